use axum::{http::StatusCode, response::IntoResponse, Json};
use cnet_auth::{AuthError, CipherError};
use cnet_db::StoreError;
use cnet_job_queue::JobQueueError;
use serde_json::json;
use thiserror::Error;

/// Top-level API error shared by all route handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("persistence error: {0}")]
    Store(#[from] StoreError),
    #[error("authentication error: {0}")]
    Authentication(#[from] AuthError),
    #[error("job queue error: {0}")]
    JobQueue(#[from] JobQueueError),
    #[error("encryption error: {0}")]
    Cipher(#[from] CipherError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("validation error")]
    Validation(serde_json::Value),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::JobQueue(
                JobQueueError::InvalidQueue(_)
                | JobQueueError::InvalidPayload { .. }
                | JobQueueError::InvalidSchedule(_),
            ) => StatusCode::BAD_REQUEST,
            ApiError::JobQueue(JobQueueError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::JobQueue(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Cipher(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized() -> Self {
        Self::Authentication(AuthError::AuthenticationFailed)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let payload = match self {
            ApiError::Validation(v) => v,
            // store failures may carry sql; keep them out of responses
            ApiError::Store(StoreError::Conflict(msg)) => json!({ "error": msg }),
            ApiError::Store(_) => {
                json!({ "error": "internal persistence error" })
            }
            other => json!({ "error": other.to_string() }),
        };

        (status, Json(payload)).into_response()
    }
}
