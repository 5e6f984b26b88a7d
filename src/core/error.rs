//! Error types and handling for the proxy server.
//!
//! This module provides a unified error type [`AppError`] that wraps various error sources
//! and implements proper HTTP response conversion.

use crate::core::error_types::{ERROR_TYPE_API, ERROR_TYPE_INVALID_REQUEST};
use crate::relay::{RelayError, StreamTransportError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Main error type for the application.
///
/// All errors in the application should be converted to this type for consistent handling.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors (file not found, parse errors, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Upstream connection, status or timeout failure
    #[error(transparent)]
    Upstream(#[from] StreamTransportError),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Client provided invalid data
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unknown endpoint
    #[error("Endpoint {0} not found")]
    NotFound(String),

    /// Client disconnected before request completed
    #[error("Client closed request")]
    ClientDisconnect,

    /// Generic internal server errors with custom message
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<RelayError> for AppError {
    fn from(error: RelayError) -> Self {
        match error {
            RelayError::Transport(e) => AppError::Upstream(e),
            RelayError::ClientDisconnected => AppError::ClientDisconnect,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            AppError::Upstream(e) => {
                let status = StatusCode::from_u16(e.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                tracing::warn!(
                    status = status.as_u16(),
                    kind = ?e.kind,
                    "Upstream failure before streaming started"
                );
                (status, e.error_type(), e.message)
            }
            AppError::Config(e) => (StatusCode::INTERNAL_SERVER_ERROR, ERROR_TYPE_API, e.to_string()),
            AppError::Serialization(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ERROR_TYPE_API, e.to_string())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ERROR_TYPE_INVALID_REQUEST, msg),
            AppError::NotFound(path) => (
                StatusCode::NOT_FOUND,
                ERROR_TYPE_INVALID_REQUEST,
                format!("Endpoint {} not found", path),
            ),
            AppError::ClientDisconnect => {
                // 408 rather than nginx's non-standard 499
                tracing::info!("Client disconnected before request completed");
                (
                    StatusCode::REQUEST_TIMEOUT,
                    ERROR_TYPE_API,
                    "Client closed request".to_string(),
                )
            }
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, ERROR_TYPE_API, msg),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;
