//! Pipeline configuration.

use std::time::Duration;

use dropwatch_core::defaults;
use dropwatch_core::{AggregationMode, Result};
use dropwatch_inference::RetryPolicy;

use crate::dedup::DuplicateDetector;

/// Configuration for the message pipeline and its maintenance tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// How candidates become stored rows.
    pub mode: AggregationMode,
    /// Generation/embedding attempts per call, first call included.
    pub max_attempts: u32,
    /// Wait used when the service suggests none.
    pub default_wait: Duration,
    /// Upper bound for any rate-limit wait.
    pub max_backoff: Duration,
    /// Pause after every message.
    pub message_delay: Duration,
    /// Skip messages whose link already has a stored row, before any
    /// generation call. Only whole-message mode honors it; see
    /// [`PipelineConfig::link_precheck`].
    pub skip_processed: bool,
    pub duplicate_threshold: f64,
    pub duplicate_match_limit: i64,
    pub related_threshold: f64,
    pub related_match_limit: i64,
    /// `None` checks every row with an embedding.
    pub related_lookback_days: Option<i64>,
    pub backfill_batch_size: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: AggregationMode::default(),
            max_attempts: defaults::MAX_ATTEMPTS,
            default_wait: Duration::from_secs(defaults::DEFAULT_WAIT_SECS),
            max_backoff: Duration::from_secs(defaults::MAX_BACKOFF_SECS),
            message_delay: Duration::from_millis(defaults::MESSAGE_DELAY_MS),
            skip_processed: true,
            duplicate_threshold: defaults::DUPLICATE_THRESHOLD,
            duplicate_match_limit: defaults::DUPLICATE_MATCH_LIMIT,
            related_threshold: defaults::RELATED_THRESHOLD,
            related_match_limit: defaults::RELATED_MATCH_LIMIT,
            related_lookback_days: Some(defaults::RELATED_LOOKBACK_DAYS),
            backfill_batch_size: defaults::BACKFILL_BATCH_SIZE,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `PIPELINE_MODE` | `whole_message` | `whole_message` or `per_update` |
    /// | `PIPELINE_MAX_ATTEMPTS` | `3` | Attempts per generation/embedding call |
    /// | `PIPELINE_DEFAULT_WAIT_SECS` | `5` | Rate-limit wait without a service hint |
    /// | `PIPELINE_MAX_BACKOFF_SECS` | `60` | Cap on any rate-limit wait |
    /// | `PIPELINE_MESSAGE_DELAY_MS` | `4000` | Pause after every message |
    /// | `PIPELINE_SKIP_PROCESSED` | `true` | Skip links that already have a row (whole-message mode) |
    /// | `DUPLICATE_THRESHOLD` | `0.92` | Similarity that flags `is_duplicate` |
    /// | `DUPLICATE_MATCH_LIMIT` | `1` | Matches requested by the duplicate check |
    /// | `RELATED_THRESHOLD` | `0.88` | Similarity for the related report |
    /// | `RELATED_MATCH_LIMIT` | `5` | Matches per row in the related report |
    /// | `RELATED_LOOKBACK_DAYS` | `7` | Related report window; `0` checks all rows |
    /// | `BACKFILL_BATCH_SIZE` | `50` | Rows per backfill page |
    ///
    /// An unknown `PIPELINE_MODE` is an error; malformed numbers fall back to defaults.
    pub fn from_env() -> Result<Self> {
        let d = Self::default();

        let mode = match std::env::var("PIPELINE_MODE") {
            Ok(v) if !v.trim().is_empty() => v.parse::<AggregationMode>()?,
            _ => d.mode,
        };

        let skip_processed = std::env::var("PIPELINE_SKIP_PROCESSED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(d.skip_processed);

        let related_lookback_days = match env_parse::<i64>("RELATED_LOOKBACK_DAYS") {
            Some(days) if days <= 0 => None,
            Some(days) => Some(days),
            None => d.related_lookback_days,
        };

        Ok(Self {
            mode,
            max_attempts: env_parse("PIPELINE_MAX_ATTEMPTS")
                .unwrap_or(d.max_attempts)
                .max(1),
            default_wait: env_parse("PIPELINE_DEFAULT_WAIT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.default_wait),
            max_backoff: env_parse("PIPELINE_MAX_BACKOFF_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.max_backoff),
            message_delay: env_parse("PIPELINE_MESSAGE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.message_delay),
            skip_processed,
            duplicate_threshold: env_parse("DUPLICATE_THRESHOLD").unwrap_or(d.duplicate_threshold),
            duplicate_match_limit: env_parse("DUPLICATE_MATCH_LIMIT")
                .unwrap_or(d.duplicate_match_limit),
            related_threshold: env_parse("RELATED_THRESHOLD").unwrap_or(d.related_threshold),
            related_match_limit: env_parse("RELATED_MATCH_LIMIT").unwrap_or(d.related_match_limit),
            related_lookback_days,
            backfill_batch_size: env_parse::<i64>("BACKFILL_BATCH_SIZE")
                .unwrap_or(d.backfill_batch_size)
                .max(1),
        })
    }

    /// Set the aggregation mode.
    pub fn with_mode(mut self, mode: AggregationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the pause after every message.
    pub fn with_message_delay(mut self, delay: Duration) -> Self {
        self.message_delay = delay;
        self
    }

    /// Enable or disable the already-processed pre-check.
    pub fn with_skip_processed(mut self, skip: bool) -> Self {
        self.skip_processed = skip;
        self
    }

    /// Set the duplicate similarity threshold.
    pub fn with_duplicate_threshold(mut self, threshold: f64) -> Self {
        self.duplicate_threshold = threshold;
        self
    }

    /// Set the retry attempt budget.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the wait used when the service gives no hint.
    pub fn with_default_wait(mut self, wait: Duration) -> Self {
        self.default_wait = wait;
        self
    }

    /// Whether an existing row for a link marks the message as done.
    ///
    /// In per-update mode a message may stop between rows, so a partial set
    /// of rows does not mean the message is complete; those messages always
    /// go back through extraction and the unique key absorbs rows already
    /// saved.
    pub fn link_precheck(&self) -> bool {
        self.skip_processed && self.mode == AggregationMode::WholeMessage
    }

    /// Retry policy shared by extraction and embedding.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_default_wait(self.default_wait)
            .with_max_backoff(self.max_backoff)
    }

    pub fn duplicate_detector(&self) -> DuplicateDetector {
        DuplicateDetector::new(self.duplicate_threshold, self.duplicate_match_limit)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}
