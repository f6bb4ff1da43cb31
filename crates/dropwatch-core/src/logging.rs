//! Structured logging schema and field name constants for dropwatch.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Store or service failure for one message, requires attention |
//! | WARN  | Recoverable issue, automatic fallback applied (skipped dedup, null embedding) |
//! | INFO  | Lifecycle events, per-message outcomes |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-record iteration, raw response samples |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "pipeline", "inference", "database"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "extraction", "parser", "aggregator", "dedup", "pool", "runner"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "extract", "embed", "save", "find_similar"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Canonical link of the source message being processed.
pub const SOURCE_LINK: &str = "source_link";

/// Channel the source message came from.
pub const CHANNEL: &str = "channel";

/// Persisted update row UUID.
pub const UPDATE_ID: &str = "update_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// One-based attempt number inside a retry loop.
pub const ATTEMPT: &str = "attempt";

/// Wait before the next attempt, in milliseconds.
pub const WAIT_MS: &str = "wait_ms";

/// Number of candidate records parsed from a response.
pub const CANDIDATE_COUNT: &str = "candidate_count";

/// Number of rows produced by aggregation.
pub const ROW_COUNT: &str = "row_count";

/// Byte length of a prompt.
pub const PROMPT_LEN: &str = "prompt_len";

/// Byte length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

// ─── Similarity fields ─────────────────────────────────────────────────────

/// Similarity threshold used for a search.
pub const THRESHOLD: &str = "threshold";

/// Number of matches returned by a similarity search.
pub const MATCH_COUNT: &str = "match_count";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
