//! Centralized default constants for dropwatch.
//!
//! Components reference these constants instead of defining their own magic
//! numbers. Every value here can be overridden through configuration.

// =============================================================================
// INPUT
// =============================================================================

/// Maximum characters of message text sent to the extractor.
pub const MAX_MESSAGE_CHARS: usize = 5000;

/// Marker appended to text cut at [`MAX_MESSAGE_CHARS`].
pub const TRUNCATION_MARKER: &str = "… [truncated]";

/// Placeholder the message source emits for media-only messages.
pub const MEDIA_PLACEHOLDER: &str = "[Media message]";

// =============================================================================
// GENERATION
// =============================================================================

/// Default generation model.
pub const GEN_MODEL: &str = "gemini-1.5-flash-latest";

/// Maximum generation attempts per message (first call included).
pub const MAX_ATTEMPTS: u32 = 3;

/// Wait before retrying when the service gives no suggested delay (seconds).
pub const DEFAULT_WAIT_SECS: u64 = 5;

/// Lower bound for any rate-limit wait (seconds).
pub const MIN_WAIT_SECS: u64 = 1;

/// Upper bound for any rate-limit wait (seconds).
pub const MAX_BACKOFF_SECS: u64 = 60;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding model.
pub const EMBED_MODEL: &str = "text-embedding-004";

/// Default embedding vector dimension for text-embedding-004.
pub const EMBED_DIMENSION: usize = 768;

/// Task hint sent with every embedding request.
pub const EMBED_TASK_TYPE: &str = "RETRIEVAL_DOCUMENT";

// =============================================================================
// SIMILARITY
// =============================================================================

/// Similarity at or above which a new row is flagged `is_duplicate`.
pub const DUPLICATE_THRESHOLD: f64 = 0.92;

/// Maximum matches requested by the duplicate check.
pub const DUPLICATE_MATCH_LIMIT: i64 = 1;

/// Similarity threshold for the exploratory related-updates report.
pub const RELATED_THRESHOLD: f64 = 0.88;

/// Maximum matches per row in the related-updates report.
pub const RELATED_MATCH_LIMIT: i64 = 5;

/// Only rows newer than this many days are checked by the related report.
pub const RELATED_LOOKBACK_DAYS: i64 = 7;

/// Page size used when scanning rows for the related report.
pub const RELATED_FETCH_BATCH: i64 = 100;

/// Tolerance applied when comparing a float similarity against a threshold.
pub const SIMILARITY_EPSILON: f64 = 1e-6;

// =============================================================================
// PIPELINE
// =============================================================================

/// Fixed pause after every message, regardless of outcome (milliseconds).
pub const MESSAGE_DELAY_MS: u64 = 4_000;

/// Rows fetched per page by the embedding backfill.
pub const BACKFILL_BATCH_SIZE: i64 = 50;

/// Default event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_threshold_stricter_than_related() {
        assert!(DUPLICATE_THRESHOLD > RELATED_THRESHOLD);
    }

    #[test]
    fn test_wait_bounds_ordered() {
        assert!(MIN_WAIT_SECS <= DEFAULT_WAIT_SECS);
        assert!(DEFAULT_WAIT_SECS <= MAX_BACKOFF_SECS);
    }
}
