//! Error types for the Checkvist client core.
//!
//! # Design
//! Every failure that reaches a caller is either a structured `ApiError`
//! (status, message, request id and a classified `ErrorKind`), a `Cancelled`
//! reason, or a local problem (bad configuration, body encoding). Callers
//! branch on `Error::kind()` rather than on message text.

use std::fmt;

pub use crate::context::Cancelled;

/// Classified failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Cancelled,
    /// Connection refused, DNS failure, I/O error: no HTTP status was received.
    Transport,
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    ServerError,
    /// HTTP 401.
    Unauthorized,
    /// HTTP 404.
    NotFound,
    /// HTTP 400.
    BadRequest,
    /// Any other non-2xx status.
    Unspecified,
}

impl ErrorKind {
    /// Whether the request executor retries failures of this kind.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Transport | ErrorKind::RateLimited | ErrorKind::ServerError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Transport => "transport",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Unspecified => "unspecified",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error for a failed call to the service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("checkvist API error (status {status}{}): {message}", request_suffix(.request_id))]
pub struct ApiError {
    /// HTTP status, or 0 when the failure happened below HTTP.
    pub status: u16,
    pub message: String,
    /// Correlation id from the `X-Request-Id` response header.
    pub request_id: Option<String>,
    pub kind: ErrorKind,
}

impl ApiError {
    pub fn new(status: u16, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            request_id: None,
            kind,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(0, ErrorKind::Transport, message)
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

fn request_suffix(request_id: &Option<String>) -> String {
    request_id
        .as_ref()
        .map(|id| format!(", request {id}"))
        .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("invalid client configuration: {0}")]
    Config(String),

    /// Backoff was asked for an attempt number below 1.
    #[error("retry attempt numbers start at 1, got {0}")]
    InvalidAttempt(u32),

    #[error("serialization failed: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("deserialization failed: {0}")]
    DeserializationError(#[source] serde_json::Error),
}

impl Error {
    /// Classified kind, when the error came from the service or a cancellation.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Api(err) => Some(err.kind),
            Error::Cancelled(_) => Some(ErrorKind::Cancelled),
            _ => None,
        }
    }

    pub fn api(&self) -> Option<&ApiError> {
        match self {
            Error::Api(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
