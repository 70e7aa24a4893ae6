//! Bounded retry with exponential backoff.
//!
//! Used only around instance-metadata calls; Vault reads and logins are
//! never retried automatically.

use crate::error::AcquisitionError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::single_retry()
    }
}

impl RetryConfig {
    /// One retry after a short pause.
    #[must_use]
    pub const fn single_retry() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }

    /// Never retry.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::single_retry()
        }
    }

    /// Set max retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

/// Executes acquisition steps with bounded retries.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from `config`.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.config.initial_delay.as_secs_f64() * self.config.multiplier.powi(exponent);
        Duration::from_secs_f64(base.min(self.config.max_delay.as_secs_f64()))
    }

    /// Whether `error` on retry `attempt` deserves another go.
    #[must_use]
    pub const fn should_retry(&self, error: &AcquisitionError, attempt: u32) -> bool {
        attempt < self.config.max_retries && error.is_retryable()
    }

    /// Run `operation`, retrying retryable failures.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted or the error is not
    /// retryable.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, AcquisitionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AcquisitionError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if !self.should_retry(&error, attempt) {
                        return Err(error);
                    }
                    let delay = self.delay_for_attempt(attempt);
                    warn!(attempt, delay_ms = millis(delay), %error, "Retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Whole milliseconds in `delay`, saturating at `u64::MAX`.
fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
