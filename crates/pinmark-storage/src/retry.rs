//! Bounded exponential-backoff retry.
//!
//! The executor runs a fallible async operation up to `max_attempts` times,
//! sleeping `min(base * multiplier^(attempt-1), max_delay)` between attempts.
//! The schedule is an `ExponentialBackoff` with randomization turned off, so
//! delays are exact and testable under paused tokio time.
//!
//! Error classification is the caller's job: `run` retries every error,
//! `run_with` takes a predicate so callers can stop early on fatal errors.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use pinmark_types::StorageSettings;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Backoff schedule for one logical operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay after the first failure
    pub base_delay: Duration,

    /// Growth factor applied per further failure
    pub multiplier: f64,

    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self {
            max_attempts: settings.max_retries,
            base_delay: settings.base_delay(),
            multiplier: settings.backoff_multiplier,
            max_delay: settings.max_delay(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Jitter-free backoff producing this policy's delays in order.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Delay to sleep after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut backoff = self.backoff();
        (0..attempt.max(1))
            .filter_map(|_| backoff.next_backoff())
            .last()
            .unwrap_or(self.base_delay)
    }

    /// Sum of every delay slept when the first `failures` attempts fail.
    pub fn total_delay(&self, failures: u32) -> Duration {
        let mut backoff = self.backoff();
        (0..failures).filter_map(|_| backoff.next_backoff()).sum()
    }
}

/// Final failure of a retried operation.
#[derive(Debug, Error)]
#[error("{label} failed after {attempts} attempt(s): {error}")]
pub struct RetryFailure<E: std::error::Error + 'static> {
    /// Label the operation ran under
    pub label: String,

    /// Attempts made before giving up
    pub attempts: u32,

    /// Error returned by the last attempt
    #[source]
    pub error: E,
}

impl<E: std::error::Error + 'static> RetryFailure<E> {
    pub fn into_inner(self) -> E {
        self.error
    }
}

/// Runs operations under a `RetryPolicy`.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op`, retrying every error up to the policy's attempt limit.
    pub async fn run<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, RetryFailure<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with(label, self.policy.max_attempts, |_| true, op)
            .await
    }

    /// Run `op` with an explicit attempt limit, retrying only errors for
    /// which `should_retry` returns true.
    pub async fn run_with<T, E, F, Fut, P>(
        &self,
        label: &str,
        max_attempts: u32,
        should_retry: P,
        mut op: F,
    ) -> Result<T, RetryFailure<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let max_attempts = max_attempts.max(1);
        let mut backoff = self.policy.backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(label, attempt, max_attempts, "Attempting operation");

            let error = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(label, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !should_retry(&error) {
                debug!(label, attempt, error = %error, "Error is not retryable");
                return Err(RetryFailure {
                    label: label.to_string(),
                    attempts: attempt,
                    error,
                });
            }

            if attempt >= max_attempts {
                warn!(label, attempts = attempt, error = %error, "Retries exhausted");
                return Err(RetryFailure {
                    label: label.to_string(),
                    attempts: attempt,
                    error,
                });
            }

            let Some(delay) = backoff.next_backoff() else {
                error!(label, attempts = attempt, error = %error, "Backoff exhausted");
                return Err(RetryFailure {
                    label: label.to_string(),
                    attempts: attempt,
                    error,
                });
            };
            warn!(
                label,
                attempt,
                error = %error,
                retry_in_ms = delay.as_millis() as u64,
                "Operation failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
