//! Control-plane error handling.
//!
//! Every command failure maps to a specific error kind with an HTTP status
//! and a stable `code`, never a generic failure.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::downloader::DownloadError;
use crate::registry::RegistryError;
use crate::scheduler::AddChannelError;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<AddChannelError> for ApiError {
    fn from(err: AddChannelError) -> Self {
        match err {
            AddChannelError::UnknownChannel(_) => ApiError::validation(err.to_string()),
            AddChannelError::Lookup { .. } => ApiError::upstream(err.to_string()),
            AddChannelError::Registry(e) => e.into(),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyExists(_) => ApiError::conflict(err.to_string()),
            RegistryError::NotFound(_) => ApiError::not_found(err.to_string()),
            RegistryError::Persist(e) => {
                tracing::error!("registry persistence error: {}", e);
                ApiError::internal("failed to persist registry")
            }
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::InvalidUrl(_) | DownloadError::InvalidQuality(_) => {
                ApiError::validation(err.to_string())
            }
            DownloadError::Lookup(_) => ApiError::upstream(err.to_string()),
            DownloadError::Storage(_) | DownloadError::Spawn(_) => {
                ApiError::internal(err.to_string())
            }
        }
    }
}
