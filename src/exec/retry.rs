//! Retry policy for rate-limited agent calls.
//!
//! Only rate-limit failures are retried; every other error propagates on the
//! first occurrence. Backoff is exponential from the base delay, with a
//! small jitter so parallel nodes do not retry in lockstep.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::types::AgentError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.pow(attempt.min(16))
    }
}

/// Run `operation` with rate-limit retries. The closure receives the attempt
/// number (0-based). After the final attempt the last rate-limit error is
/// returned unchanged, `retry_after` included.
pub async fn with_rate_limit_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, AgentError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(AgentError::RateLimit {
                message,
                retry_after,
            }) => {
                if attempt >= policy.max_retries {
                    return Err(AgentError::RateLimit {
                        message,
                        retry_after,
                    });
                }
                let delay = retry_after.unwrap_or_else(|| policy.delay_for(attempt));
                let jitter = {
                    let mut rng = rand::rng();
                    rng.random_range(0.9..1.1)
                };
                let delay = delay.mul_f64(jitter);
                warn!(
                    "rate limited ({}), retrying in {:.1}s (attempt {}/{})",
                    message,
                    delay.as_secs_f64(),
                    attempt + 1,
                    policy.max_retries
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn rate_limited() -> AgentError {
        AgentError::RateLimit {
            message: "429".to_string(),
            retry_after: Some(Duration::from_millis(1)),
        }
    }

    #[tokio::test]
    async fn retries_rate_limits_then_succeeds() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);
        let result = with_rate_limit_retry(&policy, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(rate_limited())
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_rate_limit_retry(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(rate_limited()) }
        })
        .await;
        assert!(matches!(result, Err(AgentError::RateLimit { .. })));
        // Initial call plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_do_not_retry() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_rate_limit_retry(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AgentError::Api {
                    status: 500,
                    message: "server error".to_string(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(AgentError::Api { status: 500, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_is_exponential() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
    }
}
