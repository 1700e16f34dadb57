use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Bounded retry budget for outbound calls and terminal storage writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Same budget without sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool {
        true
    }
}

/// Runs `op` until it succeeds, returns a non-retryable error, or the budget is
/// exhausted. The closure receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("{} succeeded on attempt {}", operation, attempt);
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => {
                tracing::warn!("{} failed with non-retryable error: {}", operation, e);
                return Err(e);
            }
            Err(e) if attempt >= policy.max_attempts => {
                tracing::error!(
                    "{} failed after {} attempt(s): {}",
                    operation,
                    attempt,
                    e
                );
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(
                    "{} attempt {}/{} failed: {}; retrying in {:?}",
                    operation,
                    attempt,
                    policy.max_attempts,
                    e,
                    policy.backoff
                );
                if !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(retryable={})", self.0)
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, Flaky> =
            retry_with_backoff(&RetryPolicy::immediate(3), "op", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(Flaky(true))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_at_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Flaky> =
            retry_with_backoff(&RetryPolicy::immediate(3), "op", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Flaky(true)) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Flaky> =
            retry_with_backoff(&RetryPolicy::immediate(3), "op", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Flaky(false)) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let start = tokio::time::Instant::now();
        let _: Result<(), Flaky> = retry_with_backoff(
            &RetryPolicy::new(3, Duration::from_secs(1)),
            "op",
            |_| async { Err(Flaky(true)) },
        )
        .await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
