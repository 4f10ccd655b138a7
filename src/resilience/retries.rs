//! Retry logic.
//!
//! # Responsibilities
//! - Classify failures as retryable or terminal
//! - Execute bounded retries with exponential backoff + full jitter
//!
//! # Design Decisions
//! - Network-level failures, 429 and 5xx are retried
//! - Other 4xx are terminal
//! - Unknown failures are retried

use std::fmt::Display;
use std::future::Future;

use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::{calculate_backoff, BackoffPolicy};

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Retryability of an HTTP status returned by an upstream.
pub fn is_retryable_status(status: u16) -> bool {
    match status {
        429 | 500 | 502 | 503 | 504 => true,
        400..=499 => false,
        _ => true,
    }
}

/// Bounded retrier with jittered exponential delays.
#[derive(Debug, Clone)]
pub struct BackoffRetrier {
    max_retries: u32,
    policy: BackoffPolicy,
}

impl BackoffRetrier {
    pub fn new(max_retries: u32, policy: BackoffPolicy) -> Self {
        Self { max_retries, policy }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, BackoffPolicy::from(config))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `f` up to `max_retries + 1` times; the last error propagates.
    pub async fn execute<F, Fut, T, E>(&self, mut f: F, context: &str) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(context = %context, retries = attempt, "succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) if attempt >= self.max_retries => {
                    tracing::error!(
                        context = %context,
                        retries = self.max_retries,
                        error = %e,
                        "giving up after retries"
                    );
                    return Err(e);
                }
                Err(e) if !e.is_retryable() => {
                    tracing::warn!(context = %context, error = %e, "non-retryable failure");
                    return Err(e);
                }
                Err(e) => {
                    let delay = calculate_backoff(attempt, &self.policy);
                    tracing::warn!(
                        context = %context,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    metrics::record_retry(context);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct TestError(bool);

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (retryable: {})", self.0)
        }
    }

    fn fast(max_retries: u32) -> BackoffRetrier {
        BackoffRetrier::new(
            max_retries,
            BackoffPolicy {
                base: Duration::from_millis(1),
                factor: 2.0,
                max: Duration::from_millis(4),
                jitter: true,
            },
        )
    }

    #[test]
    fn test_status_classification() {
        for status in [429, 500, 502, 503, 504] {
            assert!(is_retryable_status(status), "{status}");
        }
        for status in [400, 401, 403, 404, 422] {
            assert!(!is_retryable_status(status), "{status}");
        }
        assert!(is_retryable_status(501));
        assert!(is_retryable_status(302));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = fast(3)
            .execute(
                move || async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TestError(true))
                    } else {
                        Ok("done")
                    }
                },
                "test",
            )
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = fast(3)
            .execute(
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TestError(true))
                },
                "test",
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_aborts_after_first_attempt() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = fast(3)
            .execute(
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TestError(false))
                },
                "test",
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
