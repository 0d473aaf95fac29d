//! One retry-with-backoff loop shared by page fetches, image downloads and
//! remote calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use engine_logging::engine_debug;
use serde::{Deserialize, Serialize};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The error is final; return it immediately.
    Stop,
    /// The attempt timed out; retry after the short delay.
    AfterTimeout,
    /// Any other retryable failure; retry after the base delay.
    AfterError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub timeout_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, timeout_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            timeout_delay,
        }
    }

    /// Delay before attempt `attempt + 1`; grows linearly with the attempt count.
    pub fn delay_for(&self, decision: RetryDecision, attempt: u32) -> Duration {
        let unit = match decision {
            RetryDecision::AfterTimeout => self.timeout_delay,
            RetryDecision::AfterError | RetryDecision::Stop => self.base_delay,
        };
        unit * attempt.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(550), Duration::from_millis(350))
    }
}

/// Runs `op` until it succeeds, `classify` says stop, or the attempt budget is
/// spent. `op` receives the 1-based attempt number. The last error is returned.
pub async fn retry_with_backoff<T, E, Op, Fut, C>(
    policy: &RetryPolicy,
    label: &str,
    classify: C,
    mut op: Op,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryDecision,
    E: Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let decision = classify(&err);
        if decision == RetryDecision::Stop || attempt >= attempts {
            return Err(err);
        }
        let delay = policy.delay_for(decision, attempt);
        engine_debug!("{label} attempt {attempt}/{attempts} failed: {err}; retrying in {delay:?}");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(1))
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_with_backoff(
            &quick(3),
            "test",
            |_| RetryDecision::AfterError,
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(format!("fail {attempt}"))
                    } else {
                        Ok(attempt)
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_with_backoff(
            &quick(2),
            "test",
            |_| RetryDecision::AfterTimeout,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("always".to_string()) }
            },
        )
        .await;
        assert_eq!(result, Err("always".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stop_decision_is_not_retried() {
        let calls = AtomicU32::new(0);
        let _: Result<(), String> = retry_with_backoff(
            &quick(5),
            "test",
            |_| RetryDecision::Stop,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            },
        )
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delays_grow_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(RetryDecision::AfterTimeout, 2),
            Duration::from_millis(700)
        );
        assert_eq!(
            policy.delay_for(RetryDecision::AfterError, 1),
            Duration::from_millis(550)
        );
    }
}
