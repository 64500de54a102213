//! Classify one attempt's outcome into success, retryable or fatal failure,
//! or cancellation.

use serde::Deserialize;

use crate::context::Cancelled;
use crate::error::{ApiError, ErrorKind};
use crate::http::{HttpResponse, TransportError};

/// Response header carrying the service's correlation id.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Why an attempt produced no response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    Cancelled(Cancelled),
    Transport(TransportError),
}

/// Classified result of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(HttpResponse),
    Retryable(ApiError),
    Fatal(ApiError),
    Cancelled(Cancelled),
}

/// Map an HTTP status to its failure kind. `None` for 2xx.
pub fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        200..=299 => None,
        429 => Some(ErrorKind::RateLimited),
        500..=599 => Some(ErrorKind::ServerError),
        401 => Some(ErrorKind::Unauthorized),
        404 => Some(ErrorKind::NotFound),
        400 => Some(ErrorKind::BadRequest),
        _ => Some(ErrorKind::Unspecified),
    }
}

pub fn classify(attempt: Result<HttpResponse, AttemptError>) -> Outcome {
    let response = match attempt {
        Ok(response) => response,
        Err(AttemptError::Cancelled(reason)) => return Outcome::Cancelled(reason),
        Err(AttemptError::Transport(err)) => {
            return Outcome::Retryable(ApiError::transport(err.message))
        }
    };

    let Some(kind) = classify_status(response.status) else {
        return Outcome::Success(response);
    };

    let err = ApiError::new(response.status, kind, error_message(&response)).with_request_id(
        response
            .header_value(REQUEST_ID_HEADER)
            .map(str::to_string),
    );
    if kind.is_retryable() {
        Outcome::Retryable(err)
    } else {
        Outcome::Fatal(err)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Prefer the service's `{"error": ...}` text, then the raw body.
fn error_message(response: &HttpResponse) -> String {
    if let Ok(ErrorBody { error, message }) = serde_json::from_str(&response.body) {
        if let Some(text) = error.or(message).filter(|t| !t.is_empty()) {
            return text;
        }
    }
    let body = response.body.trim();
    if body.is_empty() {
        format!("HTTP {}", response.status)
    } else {
        body.to_string()
    }
}
