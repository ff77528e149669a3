//! Homework file storage.
//!
//! One backend is picked at startup and injected into the engine.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("failed to write upload: {0}")]
    Io(#[from] std::io::Error),
    #[error("object store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("object store responded with {0}")]
    Status(reqwest::StatusCode),
}

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Stores `file` under `key` and returns the URL the learner and
    /// reviewers fetch it from.
    async fn put(&self, key: &str, file: &UploadedFile) -> Result<String, UploadError>;

    /// Deletes what `put` stored under `key`. Missing objects are not an
    /// error.
    async fn remove(&self, key: &str) -> Result<(), UploadError>;
}

/// `homework/<user>/<millis>.<ext>`; the extension keeps only ASCII
/// alphanumerics.
pub fn homework_key(user_id: Uuid, file: &UploadedFile, now: DateTime<Utc>) -> String {
    let ext: String = file
        .file_name
        .as_deref()
        .and_then(|n| n.rsplit_once('.'))
        .map(|(_, ext)| ext.chars().filter(|c| c.is_ascii_alphanumeric()).take(10).collect::<String>())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "bin".to_string());
    format!("homework/{}/{}.{}", user_id, now.timestamp_millis(), ext.to_ascii_lowercase())
}

/// Writes under a local directory that the HTTP layer serves statically.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
    public_prefix: String,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        Self { root: root.into(), public_prefix: public_prefix.into() }
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn put(&self, key: &str, file: &UploadedFile) -> Result<String, UploadError> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &file.bytes).await?;
        Ok(format!("{}/{}", self.public_prefix.trim_end_matches('/'), key))
    }

    async fn remove(&self, key: &str) -> Result<(), UploadError> {
        match tokio::fs::remove_file(self.root.join(key)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// PUTs objects to an S3-compatible gateway that accepts bearer tokens.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    public_url: String,
}

impl HttpObjectStore {
    pub fn new(endpoint: impl Into<String>, token: Option<String>, public_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token,
            public_url: public_url.into(),
        }
    }
}

#[async_trait]
impl FileStore for HttpObjectStore {
    async fn put(&self, key: &str, file: &UploadedFile) -> Result<String, UploadError> {
        let url = format!("{}/{}", self.endpoint.trim_end_matches('/'), key);
        let mut req = self
            .client
            .put(url)
            .header(
                reqwest::header::CONTENT_TYPE,
                file.content_type.as_deref().unwrap_or("application/octet-stream"),
            )
            .body(file.bytes.clone());
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            return Err(UploadError::Status(res.status()));
        }
        Ok(format!("{}/{}", self.public_url.trim_end_matches('/'), key))
    }

    async fn remove(&self, key: &str) -> Result<(), UploadError> {
        let url = format!("{}/{}", self.endpoint.trim_end_matches('/'), key);
        let mut req = self.client.delete(url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await?;
        if !res.status().is_success() && res.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(UploadError::Status(res.status()));
        }
        Ok(())
    }
}
