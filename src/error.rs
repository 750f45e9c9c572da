//! Error taxonomy for feed reads and post writes.
//!
//! Errors map onto HTTP responses for API clients. Storage failures are
//! reported as retryable and never leak their details.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::db::StoreError;

pub type Result<T> = std::result::Result<T, FeedError>;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The record changed between read and conditional write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The write needs more items than one atomic transaction allows.
    #[error("write needs {items} transaction items, limit is {limit}")]
    TransactionLimit { items: usize, limit: usize },

    #[error("storage error: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for FeedError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TransactionLimit { items, limit } => Self::TransactionLimit { items, limit },
            StoreError::ConditionFailed(message) => Self::Conflict(message),
            other => Self::Storage(other),
        }
    }
}

impl FeedError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TransactionLimit { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Conflict(_))
    }
}

impl IntoResponse for FeedError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::Storage(err) => {
                tracing::error!(error = %err, "Storage call failed");
                serde_json::json!({ "error": "Internal server error", "retryable": true })
            }
            other => serde_json::json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
