//! Error types for dropwatch.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using dropwatch's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for dropwatch operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Inference/generation failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// The remote service reported quota exhaustion.
    ///
    /// `retry_after` carries the service-suggested wait when one was supplied.
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The generation service refused the prompt.
    #[error("Content blocked: {0}")]
    ContentBlocked(String),

    /// The generation service returned no content blocks and no block reason.
    #[error("Generation service returned an empty response")]
    EmptyResponse,

    /// The extraction response could not be parsed.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// A value failed a schema or domain check.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// A stop request interrupted a wait.
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is a rate-limit signal that may be retried.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }

    /// Service-suggested wait attached to a rate-limit error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

/// Structured failure from the extraction response parser.
///
/// Every variant keeps the raw model output so operators can see exactly
/// what the extractor produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Neither a fenced block nor a `{ ... }` span was present.
    #[error("no JSON object found in response")]
    NoJsonFound { raw: String },

    /// The candidate JSON text did not decode.
    #[error("invalid JSON: {reason}")]
    InvalidJson { reason: String, raw: String },

    /// The decoded value was not a JSON object.
    #[error("top-level value is not an object")]
    NotAnObject { raw: String },

    /// A required top-level key was absent.
    #[error("missing required key '{field}'")]
    MissingField { field: String, raw: String },

    /// A field had the wrong type. `index` is the position inside the
    /// candidate list, or `None` for top-level fields.
    #[error("{}", describe_invalid_field(.index, .field, .expected))]
    InvalidField {
        index: Option<usize>,
        field: String,
        expected: String,
        raw: String,
    },
}

fn describe_invalid_field(index: &Option<usize>, field: &str, expected: &str) -> String {
    match index {
        Some(i) => format!("record {}: field '{}' must be {}", i, field, expected),
        None => format!("field '{}' must be {}", field, expected),
    }
}

impl ParseError {
    /// The raw response text that failed to parse.
    pub fn raw(&self) -> &str {
        match self {
            ParseError::NoJsonFound { raw }
            | ParseError::InvalidJson { raw, .. }
            | ParseError::NotAnObject { raw }
            | ParseError::MissingField { raw, .. }
            | ParseError::InvalidField { raw, .. } => raw,
        }
    }
}
