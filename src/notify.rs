//! Learner notifications on grading.
//!
//! The engine only emits a [`GradedEvent`]; delivery belongs to the
//! messaging service. A failed delivery never undoes a grading.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::SubmissionStatus;

#[serde_with::skip_serializing_none]
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct GradedEvent {
    pub submission_id: Uuid,
    pub user_id: Uuid,
    pub homework_id: Uuid,
    pub lesson_id: Uuid,
    pub status: SubmissionStatus,
    pub feedback: Option<String>,
    pub graded_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook responded with {0}")]
    Status(reqwest::StatusCode),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn submission_graded(&self, event: &GradedEvent) -> Result<(), NotifyError>;
}

/// Records the event in the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn submission_graded(&self, event: &GradedEvent) -> Result<(), NotifyError> {
        tracing::info!(
            submission_id = %event.submission_id,
            user_id = %event.user_id,
            status = ?event.status,
            "submission graded"
        );
        Ok(())
    }
}

/// Posts the event as JSON to the messaging service.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), url: url.into() }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn submission_graded(&self, event: &GradedEvent) -> Result<(), NotifyError> {
        let res = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "type": "submission.graded", "data": event }))
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(NotifyError::Status(res.status()));
        }
        Ok(())
    }
}

/// Delivers and swallows failures, logging them.
pub async fn deliver(notifier: &dyn Notifier, event: &GradedEvent) {
    if let Err(e) = notifier.submission_graded(event).await {
        tracing::warn!(error = %e, submission_id = %event.submission_id, "grading notification failed");
    }
}
