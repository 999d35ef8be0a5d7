use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
    /// Budget for all attempts and waits combined.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_factor: 2.0,
            jitter: true,
            timeout: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    /// Policy that makes a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Wait before the attempt after `attempt` (1-based), before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(exp);
        let capped = millis.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter {
            let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
            base.mul_f64(factor)
        } else {
            base
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, runs out of
/// attempts, or the policy's overall timeout elapses.
///
/// Non-retryable errors are returned unchanged. Exhausting the attempts on a
/// retryable error yields `Error::RetriesExhausted` wrapping the last cause.
pub async fn with_retry<T, F, Fut>(label: &str, policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);

    let attempts = async {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(label, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => {
                    tracing::debug!(label, attempt, kind = %err.kind(), "non-retryable failure");
                    return Err(err);
                }
                Err(err) if attempt >= max_attempts => {
                    tracing::warn!(label, attempt, kind = %err.kind(), "retries exhausted");
                    return Err(Error::RetriesExhausted {
                        label: label.to_string(),
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = policy.delay(attempt);
                    tracing::warn!(
                        label,
                        attempt,
                        kind = %err.kind(),
                        delay_ms = delay.as_millis() as u64,
                        "retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    };

    match tokio::time::timeout(policy.timeout, attempts).await {
        Ok(result) => result,
        Err(_) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            tracing::warn!(label, elapsed_ms, "operation timed out");
            Err(Error::Timeout {
                label: label.to_string(),
                elapsed_ms,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            jitter: false,
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let p = policy(5);
        assert_eq!(p.base_delay(1), Duration::from_millis(100));
        assert_eq!(p.base_delay(2), Duration::from_millis(200));
        assert_eq!(p.base_delay(4), Duration::from_millis(800));
        assert_eq!(p.base_delay(5), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_retry("flaky", &policy(4), || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= 3 {
                    Err(Error::backend(ErrorKind::Unavailable, "store offline"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_is_returned_unchanged() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let err = with_retry("denied", &policy(5), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::backend(ErrorKind::PermissionDenied, "rules rejected write"))
            }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match err {
            Error::Backend { kind, message } => {
                assert_eq!(kind, ErrorKind::PermissionDenied);
                assert_eq!(message, "rules rejected write");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_carry_label_and_cause() {
        let err = with_retry("saveTestHistory", &policy(3), || async {
            Err::<(), _>(Error::backend(ErrorKind::Aborted, "contention"))
        })
        .await
        .unwrap_err();
        match &err {
            Error::RetriesExhausted { label, attempts, .. } => {
                assert_eq!(label, "saveTestHistory");
                assert_eq!(*attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::Aborted);
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn overall_timeout_wins_over_remaining_attempts() {
        let p = RetryPolicy {
            timeout: Duration::from_millis(250),
            ..policy(100)
        };
        let err = with_retry("slow", &p, || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err::<(), _>(Error::backend(ErrorKind::Network, "reset"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { ref label, .. } if label == "slow"));
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
