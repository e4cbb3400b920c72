//! Exponential backoff with jitter, wrapping any fallible async operation
//! behind a pluggable retryable-error predicate.
//!
//! Every object-store and container-service call in the workspace is
//! wrapped by a `RetryPolicy`; non-retryable errors (per the caller's
//! predicate) surface on the first attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

/// Exhausted the configured attempt budget. Carries the last observed
/// error's display string, since the retried operation's error type is
/// erased by the generic `run` signature.
#[derive(Debug, Error)]
#[error("retry budget exhausted after {attempts} attempts: {last_error}")]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last_error: String,
}

/// Backoff parameters. Defaults match the cadence the spec calls out for
/// object-store operations: a 1s floor doubling to a 30s ceiling.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter fraction applied symmetrically around the computed delay,
    /// e.g. `0.2` means ±20%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter: 0.2,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter_span = capped * self.jitter;
        let jittered = if jitter_span > 0.0 {
            let delta = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
            (capped + delta).max(0.0)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered)
    }

    /// Run `op` up to `max_attempts` times, retrying whenever `is_retryable`
    /// returns true for the error it produced. Sleeps with exponential
    /// backoff + jitter between attempts; returns the last error wrapped in
    /// [`RetryExhausted`] once the budget is spent.
    pub async fn run<T, E, F, Fut>(&self, mut is_retryable: impl FnMut(&E) -> bool, mut op: F) -> Result<T, RetryExhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    attempt += 1;
                    let retryable = is_retryable(&e);
                    if !retryable || attempt >= self.max_attempts {
                        tracing::warn!(attempt, retryable, error = %e, "retry budget exhausted or non-retryable error");
                        return Err(RetryExhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    let delay = self.delay_for_attempt(attempt - 1);
                    tracing::debug!(attempt, ?delay, error = %e, "retrying after transient error");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_ok() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryExhausted> = policy
            .run(
                |_: &&str| true,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<u32, &str>(42) }
                },
            )
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(5));
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryExhausted> = policy
            .run(
                |_: &&str| true,
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err("transient")
                        } else {
                            Ok(99)
                        }
                    }
                },
            )
            .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_surfaces_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(5));
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryExhausted> = policy
            .run(
                |_: &&str| false,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<u32, &str>("fatal") }
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_budget_and_reports_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
        let result: Result<u32, RetryExhausted> = policy
            .run(|_: &&str| true, || async { Err::<u32, &str>("always") })
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
    }
}
