//! Token-bucket rate limiting for provider subtrees.
//!
//! One limiter per `claude-provider` node, shared by every agent node in its
//! subtree. Buckets refill on elapsed time; an acquire that cannot proceed
//! waits in short sleeps until capacity frees or the queue timeout expires.
//! Limits update in place when the provider re-renders, and a removed limit
//! reverts to unlimited without recreating the limiter.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::usage::BudgetLimits;
use crate::tree::Props;

const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Limits configured on a provider node. `None` means unlimited.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderLimits {
    pub requests_per_minute: Option<u64>,
    pub tokens_per_minute: Option<u64>,
    pub queue_timeout: Option<Duration>,
    pub budget: Option<BudgetLimits>,
}

impl ProviderLimits {
    pub fn from_props(props: &Props) -> Self {
        Self {
            requests_per_minute: props.int_prop("requestsPerMinute").map(|n| n as u64),
            tokens_per_minute: props.int_prop("tokensPerMinute").map(|n| n as u64),
            queue_timeout: props
                .int_prop("queueTimeoutMs")
                .map(|ms| Duration::from_millis(ms as u64)),
            budget: props
                .get("budget")
                .map(|v| v.to_json())
                .as_ref()
                .and_then(BudgetLimits::from_json),
        }
    }
}

/// Permit handed back from a successful acquire.
#[derive(Debug, Clone)]
pub struct RatePermit {
    pub granted_at: DateTime<Utc>,
    pub tokens_reserved: u64,
    pub permit_id: Uuid,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("provider queue timeout after {waited_ms}ms waiting for {dimension}")]
    QueueTimeout { dimension: &'static str, waited_ms: u64 },
    #[error("provider budget exceeded: {0}")]
    BudgetExceeded(String),
}

/// Which limit forced a wait; reported through `onRateLimited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitDimension {
    Requests,
    Tokens,
}

#[derive(Debug)]
struct Bucket {
    available: u64,
    last_refill: DateTime<Utc>,
}

impl Bucket {
    fn new(capacity: u64) -> Self {
        Self {
            available: capacity,
            last_refill: Utc::now(),
        }
    }

    fn refill(&mut self, capacity: u64) {
        let elapsed = Utc::now().signed_duration_since(self.last_refill);
        if elapsed >= chrono::Duration::seconds(60) {
            self.available = capacity;
            self.last_refill = Utc::now();
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    limits: ProviderLimits,
    request_bucket: Bucket,
    token_bucket: Bucket,
}

/// Rate limiter for one provider subtree.
#[derive(Debug)]
pub struct ProviderLimiter {
    state: Mutex<LimiterState>,
}

/// Snapshot for status displays.
#[derive(Debug, Clone)]
pub struct LimiterStatus {
    pub limits: ProviderLimits,
    pub available_requests: Option<u64>,
    pub available_tokens: Option<u64>,
}

impl ProviderLimiter {
    pub fn new(limits: ProviderLimits) -> Self {
        let request_capacity = limits.requests_per_minute.unwrap_or(0);
        let token_capacity = limits.tokens_per_minute.unwrap_or(0);
        Self {
            state: Mutex::new(LimiterState {
                request_bucket: Bucket::new(request_capacity),
                token_bucket: Bucket::new(token_capacity),
                limits,
            }),
        }
    }

    /// Replace the limits in place. Buckets keep their consumption so a
    /// tightened limit applies immediately; a raised or removed limit frees
    /// waiting acquires at their next poll.
    pub async fn update_limits(&self, limits: ProviderLimits) {
        let mut state = self.state.lock().await;
        if state.limits == limits {
            return;
        }
        debug!("provider limits updated in place: {:?}", limits);
        // Capacity increases grant the difference right away.
        if let (Some(old), Some(new)) = (
            state.limits.requests_per_minute,
            limits.requests_per_minute,
        ) && new > old
        {
            state.request_bucket.available += new - old;
        }
        if let (Some(old), Some(new)) =
            (state.limits.tokens_per_minute, limits.tokens_per_minute)
            && new > old
        {
            state.token_bucket.available += new - old;
        }
        if state.limits.requests_per_minute.is_none()
            && let Some(capacity) = limits.requests_per_minute
        {
            state.request_bucket = Bucket::new(capacity);
        }
        if state.limits.tokens_per_minute.is_none()
            && let Some(capacity) = limits.tokens_per_minute
        {
            state.token_bucket = Bucket::new(capacity);
        }
        state.limits = limits;
    }

    pub async fn limits(&self) -> ProviderLimits {
        self.state.lock().await.limits.clone()
    }

    pub async fn status(&self) -> LimiterStatus {
        let state = self.state.lock().await;
        LimiterStatus {
            limits: state.limits.clone(),
            available_requests: state
                .limits
                .requests_per_minute
                .map(|_| state.request_bucket.available),
            available_tokens: state
                .limits
                .tokens_per_minute
                .map(|_| state.token_bucket.available),
        }
    }

    /// Acquire capacity for one agent call. Waits up to the queue timeout;
    /// `on_limited` fires once per acquire, only when an actual rate limit
    /// forced the wait (queue timeouts themselves are not limit events).
    pub async fn acquire(
        &self,
        estimated_tokens: u64,
        mut on_limited: impl FnMut(LimitDimension),
    ) -> Result<RatePermit, ProviderError> {
        let started = std::time::Instant::now();
        let mut notified = false;
        loop {
            let blocked = {
                let mut state = self.state.lock().await;
                let request_capacity = state.limits.requests_per_minute;
                let token_capacity = state.limits.tokens_per_minute;
                if let Some(capacity) = request_capacity {
                    state.request_bucket.refill(capacity);
                }
                if let Some(capacity) = token_capacity {
                    state.token_bucket.refill(capacity);
                }

                let need_request = request_capacity.is_some();
                let request_ok = !need_request || state.request_bucket.available >= 1;
                let tokens_ok = token_capacity.is_none()
                    || state.token_bucket.available >= estimated_tokens;

                if request_ok && tokens_ok {
                    if need_request {
                        state.request_bucket.available -= 1;
                    }
                    if token_capacity.is_some() {
                        state.token_bucket.available -= estimated_tokens;
                    }
                    return Ok(RatePermit {
                        granted_at: Utc::now(),
                        tokens_reserved: estimated_tokens,
                        permit_id: Uuid::new_v4(),
                    });
                }
                if !request_ok {
                    LimitDimension::Requests
                } else {
                    LimitDimension::Tokens
                }
            };

            if !notified {
                on_limited(blocked);
                notified = true;
            }

            let queue_timeout = {
                let state = self.state.lock().await;
                state.limits.queue_timeout
            };
            if let Some(timeout) = queue_timeout
                && started.elapsed() >= timeout
            {
                return Err(ProviderError::QueueTimeout {
                    dimension: match blocked {
                        LimitDimension::Requests => "requests",
                        LimitDimension::Tokens => "tokens",
                    },
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(ACQUIRE_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(requests: Option<u64>, tokens: Option<u64>) -> ProviderLimits {
        ProviderLimits {
            requests_per_minute: requests,
            tokens_per_minute: tokens,
            queue_timeout: Some(Duration::from_millis(120)),
            budget: None,
        }
    }

    #[tokio::test]
    async fn unlimited_limiter_always_grants() {
        let limiter = ProviderLimiter::new(ProviderLimits::default());
        for _ in 0..100 {
            limiter.acquire(10_000, |_| {}).await.unwrap();
        }
    }

    #[tokio::test]
    async fn request_limit_blocks_then_times_out() {
        let limiter = ProviderLimiter::new(limits(Some(2), None));
        limiter.acquire(0, |_| {}).await.unwrap();
        limiter.acquire(0, |_| {}).await.unwrap();

        let mut limited_dim = None;
        let err = limiter
            .acquire(0, |dim| limited_dim = Some(dim))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::QueueTimeout { dimension: "requests", .. }));
        assert_eq!(limited_dim, Some(LimitDimension::Requests));
    }

    #[tokio::test]
    async fn token_limit_is_independent_of_requests() {
        let limiter = ProviderLimiter::new(limits(None, Some(100)));
        limiter.acquire(80, |_| {}).await.unwrap();
        let err = limiter.acquire(50, |_| {}).await.unwrap_err();
        assert!(matches!(err, ProviderError::QueueTimeout { dimension: "tokens", .. }));
    }

    #[tokio::test]
    async fn removing_a_limit_reverts_to_unlimited_in_place() {
        let limiter = ProviderLimiter::new(limits(Some(1), None));
        limiter.acquire(0, |_| {}).await.unwrap();
        assert!(limiter.acquire(0, |_| {}).await.is_err());

        limiter.update_limits(ProviderLimits::default()).await;
        limiter.acquire(0, |_| {}).await.unwrap();
    }

    #[tokio::test]
    async fn raising_a_limit_grants_the_difference() {
        let limiter = ProviderLimiter::new(limits(Some(1), None));
        limiter.acquire(0, |_| {}).await.unwrap();
        limiter.update_limits(limits(Some(3), None)).await;
        limiter.acquire(0, |_| {}).await.unwrap();
        limiter.acquire(0, |_| {}).await.unwrap();
        assert!(limiter.acquire(0, |_| {}).await.is_err());
    }

    #[test]
    fn limits_decode_from_props() {
        let mut props = Props::new();
        props.set("requestsPerMinute", 30i64);
        props.set("tokensPerMinute", 50_000i64);
        props.set("queueTimeoutMs", 2_000i64);
        props.set(
            "budget",
            serde_json::json!({"maxTokens": 1_000_000, "maxCostUsd": 5.0}),
        );
        let limits = ProviderLimits::from_props(&props);
        assert_eq!(limits.requests_per_minute, Some(30));
        assert_eq!(limits.tokens_per_minute, Some(50_000));
        assert_eq!(limits.queue_timeout, Some(Duration::from_secs(2)));
        assert!(limits.budget.is_some());
    }
}
