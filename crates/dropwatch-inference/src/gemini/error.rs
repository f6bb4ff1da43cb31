//! Gemini-specific error handling.

use std::time::Duration;

use dropwatch_core::Error;

/// Gemini error codes, derived from HTTP status and canonical status text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeminiErrorCode {
    /// Malformed request or unsupported argument.
    InvalidArgument,
    /// Missing or rejected API key.
    PermissionDenied,
    /// Model not found or not available.
    NotFound,
    /// Quota or rate limit exhausted.
    ResourceExhausted,
    /// Server error.
    ServerError,
    /// Unknown error.
    Unknown,
}

/// Which endpoint produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Generation,
    Embedding,
}

impl GeminiErrorCode {
    /// Determine error code from HTTP status and canonical status.
    pub fn from_response(status: u16, status_text: &str) -> Self {
        match (status, status_text) {
            (429, _) | (_, "RESOURCE_EXHAUSTED") => Self::ResourceExhausted,
            (401 | 403, _) | (_, "PERMISSION_DENIED" | "UNAUTHENTICATED") => {
                Self::PermissionDenied
            }
            (404, _) | (_, "NOT_FOUND") => Self::NotFound,
            (400, _) | (_, "INVALID_ARGUMENT") => Self::InvalidArgument,
            (500..=599, _) => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Only quota exhaustion is retried; every other failure ends the call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceExhausted)
    }
}

/// Convert a Gemini error to a dropwatch Error.
pub fn to_dropwatch_error(
    code: GeminiErrorCode,
    surface: Surface,
    message: &str,
    retry_after: Option<Duration>,
) -> Error {
    let wrap = |msg: String| match surface {
        Surface::Generation => Error::Inference(msg),
        Surface::Embedding => Error::Embedding(msg),
    };
    match code {
        GeminiErrorCode::ResourceExhausted => Error::RateLimited {
            message: message.to_string(),
            retry_after,
        },
        GeminiErrorCode::PermissionDenied => {
            Error::Config(format!("Authentication failed: {}", message))
        }
        GeminiErrorCode::NotFound => Error::Config(format!("Model not found: {}", message)),
        GeminiErrorCode::InvalidArgument => wrap(format!("Invalid request: {}", message)),
        GeminiErrorCode::ServerError => wrap(format!("Server error: {}", message)),
        GeminiErrorCode::Unknown => wrap(message.to_string()),
    }
}

/// Parse a `retryDelay` duration string such as `"37s"` or `"1.500s"`.
pub fn parse_retry_delay(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().trim_end_matches('s').parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

/// Parse a `Retry-After` header in delta-seconds form.
pub fn parse_retry_after_header(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
