//! HTTP error responses
//!
//! Every failure leaves the server as `{success: false, error, message}` with
//! a status derived from the engine's [`ErrorKind`].

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use trial_store::{ErrorKind, RandomisationError};

/// Failure body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Always false
    pub success: bool,
    /// Machine-readable code
    pub error: String,
    /// Human-readable reason
    pub message: String,
}

/// Error returned by request handlers
#[derive(Debug, Error)]
pub enum ApiError {
    /// Engine operation failed
    #[error(transparent)]
    Engine(#[from] RandomisationError),

    /// Caller identity headers missing or malformed
    #[error("{0}")]
    Unauthenticated(String),

    /// Request body or path could not be decoded
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(err) => match err.kind() {
                ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::State | ErrorKind::Exhausted => StatusCode::CONFLICT,
                ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Store => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Engine(err) => err.kind().code(),
            ApiError::Unauthenticated(_) => "unauthenticated",
            ApiError::BadRequest(_) => "bad_request",
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = ErrorBody {
            success: false,
            error: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
