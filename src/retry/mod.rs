//! Bounded exponential backoff around calls to external services.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_retry2::strategy::{jitter, ExponentialBackoff};
use tokio_retry2::{Retry, RetryError};

use crate::config::RetryConfig;
use crate::error::{Classify, ErrorCategory};

/// Delays between attempts for `policy`, without jitter.
///
/// The first retry waits `initial_backoff_ms`, each following one doubles,
/// capped at `max_delay_secs`. Yields `max_attempts - 1` delays.
pub fn backoff_schedule(policy: &RetryConfig) -> impl Iterator<Item = Duration> {
    // from_millis(2) doubles each step; the factor scales the first step
    // to the configured initial backoff
    let factor = (policy.initial_backoff_ms / 2).max(1);
    ExponentialBackoff::from_millis(2)
        .factor(factor)
        .max_delay(Duration::from_secs(policy.max_delay_secs))
        .take(policy.max_attempts.saturating_sub(1))
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget is spent.
///
/// Transient and rate-limited failures are retried. A server-provided
/// `Retry-After` wins over the computed delay; rate-limited failures without
/// one wait `quota_delay_secs`.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryConfig, name: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + Display,
{
    let strategy = backoff_schedule(policy).map(jitter);
    let quota_delay = Duration::from_secs(policy.quota_delay_secs);
    let max_attempts = policy.max_attempts;
    let mut attempt = 0usize;

    Retry::spawn(strategy, || {
        attempt += 1;
        let current = attempt;
        let call = operation();
        async move {
            match call.await {
                Ok(value) => Ok(value),
                Err(e) => match e.category() {
                    ErrorCategory::Transient | ErrorCategory::RateLimited => {
                        let retry_after = e.retry_after().or_else(|| {
                            (e.category() == ErrorCategory::RateLimited).then_some(quota_delay)
                        });
                        tracing::warn!(
                            operation = name,
                            attempt = current,
                            max_attempts,
                            category = %e.category(),
                            "{} failed, may retry: {}",
                            name,
                            e
                        );
                        Err(RetryError::Transient { err: e, retry_after })
                    }
                    category => {
                        tracing::debug!(operation = name, %category, "{} failed permanently: {}", name, e);
                        Err(RetryError::Permanent(e))
                    }
                },
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct Flaky(ErrorCategory);

    impl Classify for Flaky {
        fn category(&self) -> ErrorCategory {
            self.0
        }
    }

    fn fast_policy(max_attempts: usize) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_ms: 2,
            max_delay_secs: 1,
            quota_delay_secs: 0,
        }
    }

    #[test]
    fn test_backoff_schedule_doubles() {
        let policy = RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 1000,
            max_delay_secs: 5,
            quota_delay_secs: 60,
        };
        let delays: Vec<_> = backoff_schedule(&policy).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_secs(5),
            ]
        );
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicUsize::new(0);

        let result = with_retry(&fast_policy(4), "flaky call", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Flaky(ErrorCategory::Transient))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = with_retry(&fast_policy(4), "bad call", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Flaky(ErrorCategory::Permanent)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = with_retry(&fast_policy(3), "down call", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Flaky(ErrorCategory::RateLimited)) }
        })
        .await;

        assert_eq!(result.unwrap_err().0, ErrorCategory::RateLimited);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_first_success_returns_immediately() {
        let result = tokio_test::block_on(with_retry(&fast_policy(3), "healthy call", || async {
            Ok::<_, Flaky>("ok")
        }));
        tokio_test::assert_ok!(result);
    }
}
