//! Retry policy for queued deliveries
//!
//! Two layers of retrying:
//! - immediate retries of a single delivery within one sync pass
//! - deferred retries across sync passes, tracked on the queue item
//!   (`attempts`, `next_attempt_at`) with exponential backoff and an
//!   optional attempt ceiling after which the item is dead-lettered

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Configuration for queued delivery retries
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Failed attempts before an item is dead-lettered (None = never)
    pub max_attempts: Option<u32>,
    /// Deferral after the first failure (zero = retry on the next trigger)
    pub initial_backoff: Duration,
    /// Caps exponential growth
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 = double each time)
    pub multiplier: f64,
    /// Jitter factor (0.0-1.0) applied to the computed backoff
    pub jitter: f64,
    /// Extra in-pass attempts per delivery before recording a failure
    pub immediate_retries: u32,
}

impl Default for RetryPolicy {
    /// Unlimited attempts, retried on every sync trigger
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.0,
            immediate_retries: 0,
        }
    }
}

impl RetryPolicy {
    /// Load the policy from `SYNC_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_attempts = std::env::var("SYNC_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v > 0);

        let initial_backoff = std::env::var("SYNC_BACKOFF_INITIAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.initial_backoff);

        let max_backoff = std::env::var("SYNC_BACKOFF_MAX_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_backoff);

        let multiplier = std::env::var("SYNC_BACKOFF_MULTIPLIER")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| *v >= 1.0)
            .unwrap_or(defaults.multiplier);

        let jitter = std::env::var("SYNC_BACKOFF_JITTER")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or(defaults.jitter);

        let immediate_retries = std::env::var("SYNC_IMMEDIATE_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults.immediate_retries);

        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            multiplier,
            jitter,
            immediate_retries,
        }
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    pub fn with_max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = delay;
        self
    }

    pub fn with_immediate_retries(mut self, retries: u32) -> Self {
        self.immediate_retries = retries;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Deferral after the given number of failed attempts (1-indexed)
    pub fn backoff_after(&self, attempts: u32) -> Duration {
        if self.initial_backoff.is_zero() || attempts == 0 {
            return Duration::ZERO;
        }

        let exponent = (attempts - 1).min(i32::MAX as u32) as i32;
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_backoff.as_secs_f64());

        let delay = if self.jitter > 0.0 {
            let range = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-range..=range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }

    /// Whether an item with this many failed attempts should leave the queue
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Result of a retried operation
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// The final result (success or last error)
    pub result: Result<T, E>,
    /// Number of attempts made (1 = succeeded on first try)
    pub attempts: u32,
}

impl<T, E> RetryResult<T, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Executor for in-pass immediate retries
pub struct Retry {
    retries: u32,
    delay: Duration,
}

impl Retry {
    /// Build an executor from the policy's immediate retry settings
    pub fn immediate(policy: &RetryPolicy) -> Self {
        Self {
            retries: policy.immediate_retries,
            delay: policy.initial_backoff.min(Duration::from_secs(1)),
        }
    }

    /// Run an operation, retrying failures and logging under `context`
    pub async fn run_with_context<F, Fut, T, E>(
        &self,
        context: &str,
        operation: F,
    ) -> RetryResult<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::info!(
                            context = context,
                            attempts = attempts,
                            "Operation succeeded after retries"
                        );
                    }
                    return RetryResult {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(e) => {
                    if attempts > self.retries {
                        return RetryResult {
                            result: Err(e),
                            attempts,
                        };
                    }

                    tracing::debug!(
                        context = context,
                        attempt = attempts,
                        max_retries = self.retries,
                        error = %e,
                        "Operation failed, will retry"
                    );

                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
    }
}
