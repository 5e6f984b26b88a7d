//! Error types for the streaming relay.

use crate::core::error_types::{
    truncate_message, ERROR_TYPE_API, ERROR_TYPE_STREAM, ERROR_TYPE_TIMEOUT,
};
use serde_json::{json, Value};
use thiserror::Error;

/// What went wrong on the upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Upstream answered with a non-2xx status.
    Status,
    /// The per-call deadline expired.
    Timeout,
    /// Could not connect to upstream.
    Connect,
    /// The connection failed while reading the body.
    Body,
}

/// Upstream connection, status or timeout failure.
#[derive(Debug, Clone, Error)]
#[error("upstream transport error ({kind:?}): {message}")]
pub struct StreamTransportError {
    pub kind: TransportErrorKind,
    /// Upstream HTTP status, when one was received.
    pub status: Option<u16>,
    pub message: String,
}

impl StreamTransportError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Status,
            status: Some(status),
            message: truncate_message(&message.into()),
        }
    }

    pub fn timeout() -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            status: None,
            message: "Upstream request timed out".to_string(),
        }
    }

    pub fn connect() -> Self {
        Self {
            kind: TransportErrorKind::Connect,
            status: None,
            message: "Failed to connect to upstream provider".to_string(),
        }
    }

    pub fn body(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Body,
            status: None,
            message: message.into(),
        }
    }

    /// Classify a reqwest error. Messages are sanitized so internal URLs and
    /// addresses never reach the client.
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::timeout()
        } else if error.is_connect() {
            Self::connect()
        } else if let Some(status) = error.status() {
            Self::status(status.as_u16(), format!("HTTP {}", status))
        } else if error.is_body() || error.is_decode() {
            Self::body("Upstream stream interrupted")
        } else {
            Self::body("Upstream request failed")
        }
    }

    /// HTTP status to report downstream.
    pub fn http_status(&self) -> u16 {
        match (self.kind, self.status) {
            (_, Some(status)) => status,
            (TransportErrorKind::Timeout, None) => 504,
            (TransportErrorKind::Connect, None) | (TransportErrorKind::Body, None) => 502,
            (TransportErrorKind::Status, None) => 500,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self.kind {
            TransportErrorKind::Timeout => ERROR_TYPE_TIMEOUT,
            _ => ERROR_TYPE_API,
        }
    }

    /// OpenAI-style error body: `{"error": {"message", "type", "code"}}`.
    pub fn to_error_body(&self) -> Value {
        json!({
            "error": {
                "message": self.message,
                "type": self.error_type(),
                "code": self.http_status()
            }
        })
    }

    /// Error event sent in-band once the stream has started.
    pub fn to_stream_error_body(&self) -> Value {
        json!({
            "error": {
                "message": self.message,
                "type": ERROR_TYPE_STREAM,
                "code": self.http_status()
            }
        })
    }
}

/// The downstream client went away; writes can no longer be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("relay sink closed")]
pub struct SinkClosed;

/// Failure of one orchestrated exchange.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Upstream failed during the initial phase.
    #[error(transparent)]
    Transport(#[from] StreamTransportError),

    /// The client disconnected; the upstream call was abandoned.
    #[error("client disconnected")]
    ClientDisconnected,
}

impl From<SinkClosed> for RelayError {
    fn from(_: SinkClosed) -> Self {
        RelayError::ClientDisconnected
    }
}
