//! # Retry Mechanism
//!
//! Exponential backoff with optional jitter for operations whose failures
//! may be transient, such as reconnect hooks run by automated remediation.

use std::future::Future;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::types::Result;

/// Configuration for a retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: usize,
    /// Delay before the first retry
    pub base_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Growth factor applied per attempt
    pub multiplier: f64,
    /// Apply +/-10% jitter to each delay
    pub jitter: bool,
    /// Give up immediately on errors not flagged transient
    pub retry_only_transient: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            retry_only_transient: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that runs the operation exactly once
    pub fn never() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay to wait after the given (zero based) failed attempt
    pub fn backoff(&self, attempt: usize) -> Duration {
        let base_ms = self.base_backoff.as_millis() as f64;
        let max_ms = self.max_backoff.as_millis() as f64;

        let capped = (base_ms * self.multiplier.powi(attempt.min(16) as i32)).min(max_ms);

        let final_ms = if self.jitter && capped > 0.0 {
            let jitter_factor = rand::thread_rng().gen_range(-0.1..0.1);
            (capped * (1.0 + jitter_factor)).max(0.0)
        } else {
            capped
        };

        Duration::from_millis(final_ms as u64)
    }
}

/// Executes `f` until it succeeds or the policy is exhausted, returning the
/// last error in the latter case.
pub async fn retry<F, Fut, T>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        counter!("retry.attempts", 1, "operation" => operation.to_string());

        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        operation = %operation,
                        attempts = attempt + 1,
                        duration_ms = %start.elapsed().as_millis(),
                        "Operation succeeded after retries"
                    );
                }
                histogram!(
                    "retry.duration_ms",
                    start.elapsed().as_millis() as f64,
                    "operation" => operation.to_string()
                );
                return Ok(value);
            }
            Err(error) => {
                attempt += 1;

                let give_up = attempt >= max_attempts
                    || (policy.retry_only_transient && !error.is_transient());

                if give_up {
                    counter!("retry.exhausted", 1, "operation" => operation.to_string());
                    warn!(
                        operation = %operation,
                        attempts = attempt,
                        error = %error,
                        "Operation failed, giving up"
                    );
                    return Err(error);
                }

                let delay = policy.backoff(attempt - 1);
                debug!(
                    operation = %operation,
                    attempt = attempt,
                    delay_ms = %delay.as_millis(),
                    error = %error,
                    "Operation failed, retrying after backoff"
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Error, ErrorKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            jitter: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
            jitter: false,
            ..Default::default()
        };

        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(5), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_jitter_stays_within_ten_percent() {
        let policy = RetryPolicy {
            base_backoff: Duration::from_millis(1000),
            jitter: true,
            ..Default::default()
        };

        for _ in 0..50 {
            let delay = policy.backoff(0).as_millis();
            assert!((900..=1100).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let result = retry(&fast_policy(3), "flaky", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(Error::new(ErrorKind::Communication, "not yet").transient())
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_returns_last_error_when_exhausted() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let result: Result<()> = retry(&fast_policy(2), "always-fails", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::new(ErrorKind::Unavailable, "down"))
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_only_transient_stops_on_permanent_error() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let policy = RetryPolicy {
            retry_only_transient: true,
            ..fast_policy(5)
        };

        let result: Result<()> = retry(&policy, "permanent", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::new(ErrorKind::Configuration, "bad credentials"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
