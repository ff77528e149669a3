use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::{store::StoreError, uploads::UploadError};

/// Why a lesson is not reachable for the caller right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    /// The previous lesson in canonical order is not completed.
    Sequential,
    /// The drip delay since enrollment has not elapsed.
    Drip { unlock_at: Option<DateTime<Utc>> },
}

impl std::fmt::Display for LockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockReason::Sequential => f.write_str("previous lessons must be completed first"),
            LockReason::Drip { unlock_at: Some(at) } => {
                write!(f, "lesson becomes available on {}", at.format("%Y-%m-%d"))
            }
            LockReason::Drip { unlock_at: None } => f.write_str("lesson is not available yet"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("locked: {0}")]
    LockedContent(LockReason),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("authentication required")]
    Unauthenticated,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::LockedContent(_) => "locked_content",
            EngineError::ValidationFailed(_) => "validation_failed",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Unauthenticated => "unauthenticated",
            EngineError::Store(_) | EngineError::Upload(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::LockedContent(_) => StatusCode::LOCKED,
            EngineError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            EngineError::LimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            EngineError::Unauthenticated => StatusCode::UNAUTHORIZED,
            EngineError::Store(_) | EngineError::Upload(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "internal error");
            "an internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let mut error = json!({
            "kind": self.kind(),
            "message": message,
        });
        if let EngineError::LockedContent(LockReason::Drip { unlock_at: Some(at) }) = &self {
            error["unlock_at"] = json!(at);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
