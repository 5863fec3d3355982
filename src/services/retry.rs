//! Bounded polling with a fixed delay
//!
//! Used by the login token poll. Each attempt either yields a value, yields
//! nothing yet, or fails. Nothing-yet and retryable failures are retried after
//! a fixed delay until the attempt budget runs out.

use crate::steam::AuthError;
use std::fmt::Display;
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Poll budget
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay: Duration::from_secs(3),
        }
    }
}

/// Errors that may go away on another attempt
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for AuthError {
    fn is_retryable(&self) -> bool {
        AuthError::is_retryable(self)
    }
}

/// Run `f` until it yields a value or the budget is spent.
///
/// Returns `Ok(None)` when every attempt came back empty. A retryable error on
/// the last attempt is returned as is.
pub async fn poll_with_fixed_delay<T, E, F, Fut>(
    config: &PollConfig,
    operation_name: &str,
    mut f: F,
) -> Result<Option<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: Retryable + Display,
{
    let attempts = config.max_attempts.max(1);

    for attempt in 1..=attempts {
        match f(attempt).await {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => {
                debug!("[Poll] {} attempt {}/{} came back empty", operation_name, attempt, attempts);
            }
            Err(err) if err.is_retryable() && attempt < attempts => {
                warn!(
                    "[Poll] {} attempt {}/{} failed ({}), retrying in {:?}",
                    operation_name, attempt, attempts, err, config.delay
                );
            }
            Err(err) => return Err(err),
        }

        if attempt < attempts {
            sleep(config.delay).await;
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError(bool);

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (retryable: {})", self.0)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    fn fast(max_attempts: u32) -> PollConfig {
        PollConfig {
            max_attempts,
            delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_first_attempt_value() {
        let result = poll_with_fixed_delay(&fast(2), "test", |_| async {
            Ok::<_, TestError>(Some(42))
        })
        .await;
        assert_eq!(result.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_value_after_empty_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = poll_with_fixed_delay(&fast(2), "test", |attempt| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Ok::<_, TestError>(None)
                } else {
                    Ok(Some("token"))
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), Some("token"));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = poll_with_fixed_delay(&fast(3), "test", |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<Option<u32>, TestError>(None) }
        })
        .await;

        assert!(result.unwrap().is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = poll_with_fixed_delay(&fast(3), "test", |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<Option<u32>, _>(TestError(false)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retryable_error_on_last_attempt_is_returned() {
        let result = poll_with_fixed_delay(&fast(2), "test", |_| async {
            Err::<Option<u32>, _>(TestError(true))
        })
        .await;
        assert!(matches!(result, Err(TestError(true))));
    }
}
