//! Bounded retry with backoff.
//!
//! The combinators here know nothing about workloads: they take an attempt
//! budget, a classification predicate, and an async operation. The
//! Updater uses [`retry_on_conflict`] to repeat a whole read-modify-write
//! cycle when an optimistic-concurrency write is rejected.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::duration_ms;
use crate::context::CallContext;
use crate::error::Error;
use crate::result::Result;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first. Zero is treated as one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(with = "duration_ms", default = "default_initial_delay")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    #[serde(with = "duration_ms", default = "default_max_delay")]
    pub max_delay: Duration,
    /// Multiplier applied per attempt; 1.0 gives a fixed interval.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Add up to 10% random jitter to each delay.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Set the total attempt budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the delay before the second attempt.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub const fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Single attempt, no retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Retries with no delay; used by tests and the in-memory cluster.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Total attempts, never less than one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before attempt `attempt` (0-indexed); the first attempt is immediate.
    #[must_use]
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.initial_delay.is_zero() {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped_delay_ms = base_delay_ms.min(self.max_delay.as_millis() as f64);

        let final_delay_ms = if self.jitter {
            capped_delay_ms * (1.0 + rand::thread_rng().gen_range(0.0..0.1))
        } else {
            capped_delay_ms
        };

        Duration::from_millis(final_delay_ms as u64)
    }
}

/// Execute `operation`, retrying while `should_retry` classifies the error
/// as transient and the attempt budget lasts.
///
/// Delays between attempts honour `ctx`; a cancelled context stops the
/// loop with [`Error::Cancelled`].
///
/// # Errors
///
/// Returns the first non-retryable error, or the last retryable error once
/// the budget is exhausted.
pub async fn retry_if<T, F, Fut, P>(
    config: &RetryConfig,
    ctx: &CallContext,
    should_retry: P,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let total_attempts = config.attempts();
    let mut attempt = 0;

    loop {
        let delay = config.calculate_delay(attempt);
        if !delay.is_zero() {
            debug!(attempt, delay_ms = ?delay.as_millis(), "Retrying after delay");
            ctx.sleep(delay).await?;
        }

        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                attempt = attempt.saturating_add(1);
                if !should_retry(&e) || attempt >= total_attempts {
                    return Err(e);
                }
                warn!(
                    attempt,
                    error = %e,
                    remaining = total_attempts.saturating_sub(attempt),
                    "Retryable error, will retry"
                );
            }
        }
    }
}

/// Retry a read-modify-write cycle while it fails with a write conflict.
///
/// # Errors
///
/// Returns the first non-conflict error, or the last conflict once the
/// budget is exhausted.
pub async fn retry_on_conflict<T, F, Fut>(
    config: &RetryConfig,
    ctx: &CallContext,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_if(config, ctx, Error::is_conflict, operation).await
}

const fn default_max_attempts() -> u32 {
    10
}

const fn default_initial_delay() -> Duration {
    Duration::from_millis(10)
}

const fn default_max_delay() -> Duration {
    Duration::from_secs(1)
}

const fn default_backoff_multiplier() -> f64 {
    1.0
}

const fn default_jitter() -> bool {
    true
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::arithmetic_side_effects)]

    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> Error {
        Error::conflict("workload", "app-1", "stale resource version")
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let result = retry_on_conflict(&RetryConfig::immediate(5), &CallContext::background(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_conflicts() {
        let calls = AtomicU32::new(0);
        let result = retry_on_conflict(&RetryConfig::immediate(5), &CallContext::background(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { if n < 3 { Err(conflict()) } else { Ok(n) } }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_budget_with_last_conflict() {
        let calls = AtomicU32::new(0);
        let result: Result<()> =
            retry_on_conflict(&RetryConfig::immediate(4), &CallContext::background(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(Error::conflict("workload", "app-1", format!("attempt {n}"))) }
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("attempt 4"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> =
            retry_on_conflict(&RetryConfig::immediate(10), &CallContext::background(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::transport("connection refused")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _: Result<()> =
            retry_on_conflict(&RetryConfig::immediate(0), &CallContext::background(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(conflict()) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_retry_loop() {
        let (ctx, handle) = CallContext::cancellable();
        handle.cancel();
        let config = RetryConfig::default().with_initial_delay(Duration::from_secs(60));

        let result: Result<()> = retry_on_conflict(&config, &ctx, || async { Err(conflict()) }).await;
        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_calculate_delay_fixed_interval() {
        let config = RetryConfig::default().with_jitter(false);
        assert_eq!(config.calculate_delay(0), Duration::ZERO);
        assert_eq!(config.calculate_delay(1), Duration::from_millis(10));
        assert_eq!(config.calculate_delay(5), Duration::from_millis(10));
    }

    #[test]
    fn test_calculate_delay_exponential_capped() {
        let config = RetryConfig::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_max_delay(Duration::from_millis(500))
            .with_jitter(false);

        assert_eq!(config.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(400));
        assert_eq!(config.calculate_delay(4), Duration::from_millis(500));
    }
}
