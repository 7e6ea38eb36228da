//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use journey_core::JourneyError;
use serde_json::json;
use tracing::error;

/// Errors returned by handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Domain error from the journey crates
    #[error(transparent)]
    Journey(#[from] JourneyError),

    /// Request is malformed outside the webhook contract
    #[error("{0}")]
    BadRequest(String),

    /// Webhook signature missing or wrong
    #[error("invalid webhook signature")]
    InvalidSignature,
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Journey(err) => match err {
                JourneyError::NotFound(_) => StatusCode::NOT_FOUND,
                JourneyError::UnrecognizedEvent(_) => StatusCode::BAD_REQUEST,
                JourneyError::CheckpointLocked { .. } => StatusCode::LOCKED,
                JourneyError::InvalidStateTransition { .. } | JourneyError::Conflict(_) => {
                    StatusCode::CONFLICT
                }
                JourneyError::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
                JourneyError::InvalidTemplate(_) | JourneyError::PersistenceError(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidSignature => StatusCode::UNAUTHORIZED,
        }
    }

    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Journey(err) => err.code(),
            ApiError::BadRequest(_) => "bad_request",
            ApiError::InvalidSignature => "invalid_signature",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        }
        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
            "code": self.code(),
        }));
        (status, body).into_response()
    }
}

/// Handler result.
pub type ApiResult<T> = Result<T, ApiError>;
