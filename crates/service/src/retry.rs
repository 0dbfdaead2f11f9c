use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Fixed-delay retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Used by tests.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            delay: Duration::ZERO,
        }
    }
}

/// Runs `op` until it succeeds or the policy is exhausted; only the last error
/// is returned.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, what: &str, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(policy, what, |_| true, op).await
}

/// Like [`retry`], but an error for which `retryable` is false is returned
/// at once.
pub async fn retry_if<T, E, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= attempts || !retryable(&e) => return Err(e),
            Err(e) => {
                warn!(what, attempt, max_attempts = attempts, error = %e, "retrying");
                attempt += 1;
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn returns_last_error_after_exhausting() {
        let calls = AtomicU32::new(0);
        let res: Result<(), String> = retry(RetryPolicy::immediate(3), "op", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("failure {n}"))
        })
        .await;
        assert_eq!(res.unwrap_err(), "failure 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_on_first_success() {
        let calls = AtomicU32::new(0);
        let res: Result<u32, String> = retry(RetryPolicy::immediate(3), "op", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 2 {
                Err("flaky".into())
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(res.unwrap(), 2);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let res: Result<(), String> = retry_if(
            RetryPolicy::immediate(3),
            "op",
            |e: &String| !e.starts_with("fatal"),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("fatal: bad credentials".to_string())
            },
        )
        .await;
        assert_eq!(res.unwrap_err(), "fatal: bad credentials");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
