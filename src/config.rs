use anyhow::{bail, Context, Result};
use chrono::Duration;
use std::env;
use std::str::FromStr;

use crate::engine::LessonOrdering;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database: DatabaseConfig,
    pub ordering: LessonOrdering,
    pub uploads: UploadConfig,
    pub notify_webhook_url: Option<String>,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadBackend {
    /// Files under `data_dir`, served by this process at `/files`.
    Local,
    /// PUT to an external object store.
    Http,
}

impl FromStr for UploadBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(UploadBackend::Local),
            "http" | "s3" => Ok(UploadBackend::Http),
            _ => Err(format!("Unknown upload backend: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub backend: UploadBackend,
    pub data_dir: String,
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub public_url: Option<String>,
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

/// Longest accepted throttling window.
const MAX_RATE_WINDOW_SECS: i64 = 7 * 24 * 60 * 60;

fn rate_window(secs: i64) -> Result<Duration> {
    if !(1..=MAX_RATE_WINDOW_SECS).contains(&secs) {
        bail!("SUBMIT_RATE_WINDOW_SECS must be between 1 and {MAX_RATE_WINDOW_SECS}");
    }
    Duration::try_seconds(secs).context("SUBMIT_RATE_WINDOW_SECS out of range")
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("Failed to parse {key}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = parsed("PORT", 8081u16)?;

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10u32)?,
        };

        let ordering = parsed("LESSON_ORDERING", LessonOrdering::default())?;

        let backend = parsed("UPLOAD_BACKEND", UploadBackend::Local)?;
        let uploads = UploadConfig {
            backend,
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            endpoint: env::var("UPLOAD_ENDPOINT").ok(),
            token: env::var("UPLOAD_TOKEN").ok(),
            public_url: env::var("UPLOAD_PUBLIC_URL").ok(),
            max_bytes: parsed("MAX_UPLOAD_BYTES", 10 * 1024 * 1024usize)?,
        };
        if backend == UploadBackend::Http && uploads.endpoint.is_none() {
            bail!("UPLOAD_ENDPOINT must be set when UPLOAD_BACKEND=http");
        }

        let rate_limit = RateLimitConfig {
            max_requests: parsed("SUBMIT_RATE_LIMIT", 20u32)?,
            window: rate_window(parsed("SUBMIT_RATE_WINDOW_SECS", 60i64)?)?,
        };

        Ok(Config {
            port,
            database,
            ordering,
            uploads,
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").ok().filter(|u| !u.trim().is_empty()),
            rate_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_backend_names() {
        assert_eq!("LOCAL".parse::<UploadBackend>(), Ok(UploadBackend::Local));
        assert_eq!("s3".parse::<UploadBackend>(), Ok(UploadBackend::Http));
        assert!("ftp".parse::<UploadBackend>().is_err());
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        assert_eq!(parsed("COURSE_GATE_TEST_UNSET_KEY", 42u32).unwrap(), 42);
    }

    #[test]
    fn rate_window_rejects_out_of_range_values() {
        assert_eq!(rate_window(60).unwrap(), Duration::minutes(1));
        assert!(rate_window(0).is_err());
        assert!(rate_window(-5).is_err());
        assert!(rate_window(i64::MAX).is_err());
        assert!(rate_window(MAX_RATE_WINDOW_SECS + 1).is_err());
    }
}
