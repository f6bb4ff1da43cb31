//! Bounded retry on rate-limit signals.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use dropwatch_core::{defaults, Result, ShutdownSignal};

/// Retry policy for calls against rate-limited services.
///
/// Only [`dropwatch_core::Error::RateLimited`] is retried. The wait is the
/// service-suggested delay clamped to `[min_wait, max_backoff]`, or
/// `default_wait` when no delay was suggested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first call included.
    pub max_attempts: u32,
    pub default_wait: Duration,
    pub min_wait: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            default_wait: Duration::from_secs(defaults::DEFAULT_WAIT_SECS),
            min_wait: Duration::from_secs(defaults::MIN_WAIT_SECS),
            max_backoff: Duration::from_secs(defaults::MAX_BACKOFF_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_default_wait(mut self, wait: Duration) -> Self {
        self.default_wait = wait;
        self
    }

    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    /// Wait before the next attempt given the service's suggestion.
    pub fn wait_for(&self, suggested: Option<Duration>) -> Duration {
        let max = self.max_backoff.max(self.min_wait);
        match suggested {
            Some(wait) => wait.clamp(self.min_wait, max),
            None => self.default_wait.min(max),
        }
    }

    /// Run `call` until it succeeds, fails with a non-rate-limit error, or
    /// the attempt budget is spent.
    ///
    /// `call` receives the one-based attempt number. Waits end early with
    /// `Error::Cancelled` when `shutdown` fires.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        shutdown: &ShutdownSignal,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match call(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_rate_limited() => err,
                Err(err) => return Err(err),
            };

            if attempt >= max_attempts {
                warn!(
                    subsystem = "inference",
                    component = "retry",
                    op = operation,
                    attempt,
                    error = %err,
                    "Rate limited; attempt budget exhausted"
                );
                return Err(err);
            }

            let wait = self.wait_for(err.retry_after());
            info!(
                subsystem = "inference",
                component = "retry",
                op = operation,
                attempt,
                wait_ms = wait.as_millis() as u64,
                suggested = err.retry_after().is_some(),
                "Rate limited; waiting before retry"
            );
            shutdown.sleep(wait).await?;
        }
    }
}
