// Retry utility for remote calls
//
// Fixed-delay retry parameterized by attempt count, delay and a predicate
// deciding which errors are worth another attempt.

use crate::application::worker::constants::{UPLOAD_MAX_ATTEMPTS, UPLOAD_RETRY_DELAY};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the delay
    Retry(Duration),
    /// Do not retry, the operation has failed permanently
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(UPLOAD_MAX_ATTEMPTS, UPLOAD_RETRY_DELAY)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Decide what follows failed attempt number `attempt` (1-based)
    pub fn decide(&self, attempt: u32, retryable: bool) -> RetryDecision {
        if retryable && attempt < self.max_attempts {
            RetryDecision::Retry(self.delay)
        } else {
            RetryDecision::Failed
        }
    }
}

/// Final error after the policy gave up
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub error: E,
}

impl<E: fmt::Display> fmt::Display for RetryFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed after {} attempt(s): {}", self.attempts, self.error)
    }
}

/// Run `op` until it succeeds, the error is not retryable, or attempts run out.
///
/// `on_attempt` is called with the 1-based attempt number before each try.
pub async fn retry_with<T, E, Op, Fut, P, A>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut on_attempt: A,
    mut op: Op,
) -> Result<T, RetryFailure<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    A: FnMut(u32),
    E: fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        on_attempt(attempt);

        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        match policy.decide(attempt, is_retryable(&error)) {
            RetryDecision::Retry(delay) => {
                warn!(
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Attempt failed, retrying"
                );
                drop(error);
                tokio::time::sleep(delay).await;
            }
            RetryDecision::Failed => {
                warn!(
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    error = %error,
                    "Giving up"
                );
                return Err(RetryFailure {
                    attempts: attempt,
                    error,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_decide_respects_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        assert_eq!(policy.decide(1, true), RetryDecision::Retry(policy.delay));
        assert_eq!(policy.decide(2, true), RetryDecision::Retry(policy.delay));
        assert_eq!(policy.decide(3, true), RetryDecision::Failed);
        assert_eq!(policy.decide(1, false), RetryDecision::Failed);
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(5));
        let calls = AtomicU32::new(0);
        let mut seen = Vec::new();

        let result: Result<&str, RetryFailure<String>> = retry_with(
            &policy,
            |_| true,
            |attempt| seen.push(attempt),
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(format!("flaky #{}", attempt))
                    } else {
                        Ok("done")
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_millis(5));
        let calls = AtomicU32::new(0);

        let result: Result<(), RetryFailure<String>> = retry_with(
            &policy,
            |error: &String| !error.starts_with("fatal"),
            |_| {},
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal: bad request".to_string()) }
            },
        )
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
