//! # Rate and budget providers
//!
//! A `claude-provider` node establishes rate limits (requests/min,
//! tokens/min) and usage budgets (tokens, cost, window) for every agent node
//! executed within its subtree. The registry keeps one live limiter per
//! provider path across frames: re-renders update limits in place, and
//! removed limits revert to unlimited without recreating anything.
//!
//! Provider events fire only on actual limit conditions: `onRateLimited`
//! when a bucket forces a wait, `onBudgetExceeded` when a budget check
//! fails, `onUsageUpdate` after each recorded call. Queue timeouts are
//! errors, not limit events.

/// Token buckets and in-place limit updates.
pub mod limiter;

/// Per-model usage aggregation and budget checks.
pub mod usage;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

use crate::exec::TokenUsage;
use crate::tree::{node_path, NodeId, NodeKind, PropCallback, Tree};

pub use limiter::{
    LimitDimension, LimiterStatus, ProviderError, ProviderLimiter, ProviderLimits, RatePermit,
};
pub use usage::{estimate_cost, BudgetLimits, ModelUsage, UsageLedger, UsageSummary};

/// Event callbacks read from the provider node's props, refreshed each
/// frame so re-rendered closures stay current.
#[derive(Clone, Default)]
pub struct ProviderCallbacks {
    pub on_rate_limited: Option<PropCallback>,
    pub on_usage_update: Option<PropCallback>,
    pub on_budget_exceeded: Option<PropCallback>,
}

/// Live limiter + ledger for one provider node.
pub struct ProviderHandle {
    pub limiter: ProviderLimiter,
    pub ledger: UsageLedger,
    callbacks: StdMutex<ProviderCallbacks>,
}

impl ProviderHandle {
    fn new(limits: ProviderLimits) -> Self {
        let budget = limits.budget.clone();
        Self {
            limiter: ProviderLimiter::new(limits),
            ledger: UsageLedger::new(budget),
            callbacks: StdMutex::new(ProviderCallbacks::default()),
        }
    }

    fn set_callbacks(&self, callbacks: ProviderCallbacks) {
        *self.callbacks.lock().expect("callbacks lock poisoned") = callbacks;
    }

    fn callbacks(&self) -> ProviderCallbacks {
        self.callbacks.lock().expect("callbacks lock poisoned").clone()
    }

    /// Budget check plus bucket acquire for one agent call.
    pub async fn acquire(&self, estimated_tokens: u64) -> Result<RatePermit, ProviderError> {
        if let Err(err) = self.ledger.check_budget().await {
            if let Some(callback) = self.callbacks().on_budget_exceeded {
                callback(&serde_json::json!({"reason": err.to_string()}));
            }
            return Err(err);
        }
        let callbacks = self.callbacks();
        self.limiter
            .acquire(estimated_tokens, |dimension| {
                if let Some(callback) = &callbacks.on_rate_limited {
                    callback(&serde_json::json!({"dimension": dimension}));
                }
            })
            .await
    }

    /// Record usage after a call and notify observers.
    pub async fn record(&self, model: &str, usage: TokenUsage) {
        let summary = self.ledger.record(model, usage).await;
        if let Some(callback) = self.callbacks().on_usage_update {
            callback(&serde_json::to_value(&summary).unwrap_or_default());
        }
    }
}

/// Run-scoped registry of provider handles keyed by node path.
#[derive(Default)]
pub struct ProviderRegistry {
    handles: Mutex<HashMap<String, Arc<ProviderHandle>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronize handles with the freshly rendered tree: create handles
    /// for new provider nodes, update existing ones in place.
    pub async fn sync_from_tree(&self, tree: &Tree) {
        let mut handles = self.handles.lock().await;
        for provider in tree.find_all(tree.root(), NodeKind::ClaudeProvider) {
            let path = node_path(tree, provider);
            let props = &tree.get(provider).props;
            let limits = ProviderLimits::from_props(props);
            let callbacks = ProviderCallbacks {
                on_rate_limited: props.callback("onRateLimited"),
                on_usage_update: props.callback("onUsageUpdate"),
                on_budget_exceeded: props.callback("onBudgetExceeded"),
            };
            match handles.get(&path) {
                Some(handle) => {
                    handle.ledger.set_budget(limits.budget.clone()).await;
                    handle.limiter.update_limits(limits).await;
                    handle.set_callbacks(callbacks);
                }
                None => {
                    let handle = Arc::new(ProviderHandle::new(limits));
                    handle.set_callbacks(callbacks);
                    handles.insert(path, handle);
                }
            }
        }
    }

    /// Handle governing an agent node: the nearest `claude-provider`
    /// ancestor, if any.
    pub async fn handle_for(&self, tree: &Tree, agent: NodeId) -> Option<Arc<ProviderHandle>> {
        let provider = tree.nearest_ancestor(agent, NodeKind::ClaudeProvider)?;
        let path = node_path(tree, provider);
        self.handles.lock().await.get(&path).cloned()
    }

    /// Combined usage across every provider in the run.
    pub async fn total_usage(&self) -> UsageSummary {
        let handles = self.handles.lock().await;
        let mut total = UsageSummary::default();
        for handle in handles.values() {
            let summary = handle.ledger.summary().await;
            total.total_tokens += summary.total_tokens;
            total.total_cost_usd += summary.total_cost_usd;
            total.total_requests += summary.total_requests;
            for (model, usage) in summary.per_model {
                let entry = total.per_model.entry(model).or_default();
                entry.requests += usage.requests;
                entry.input_tokens += usage.input_tokens;
                entry.output_tokens += usage.output_tokens;
                entry.cost_usd += usage.cost_usd;
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Props;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tree_with_provider(requests_per_minute: i64) -> (Tree, NodeId) {
        let mut tree = Tree::new();
        let root = tree.root();
        let mut props = Props::new();
        props.set("requestsPerMinute", requests_per_minute);
        props.set("queueTimeoutMs", 50i64);
        let provider = tree.create_instance(NodeKind::ClaudeProvider, props);
        let claude = tree.create_instance(NodeKind::Claude, Props::new());
        tree.append_child(root, provider);
        tree.append_child(provider, claude);
        (tree, claude)
    }

    #[tokio::test]
    async fn registry_scopes_limits_to_subtree() {
        let (mut tree, claude) = tree_with_provider(1);
        // A sibling agent outside the provider subtree has no handle.
        let root = tree.root();
        let outside = tree.create_instance(NodeKind::Claude, Props::new());
        tree.append_child(root, outside);

        let registry = ProviderRegistry::new();
        registry.sync_from_tree(&tree).await;

        assert!(registry.handle_for(&tree, claude).await.is_some());
        assert!(registry.handle_for(&tree, outside).await.is_none());
    }

    #[tokio::test]
    async fn rerender_updates_limits_in_place() {
        let (tree, claude) = tree_with_provider(1);
        let registry = ProviderRegistry::new();
        registry.sync_from_tree(&tree).await;
        let first = registry.handle_for(&tree, claude).await.unwrap();
        first.acquire(0).await.unwrap();
        assert!(first.acquire(0).await.is_err(), "limit of 1 exhausted");

        let (tree2, claude2) = tree_with_provider(5);
        registry.sync_from_tree(&tree2).await;
        let second = registry.handle_for(&tree2, claude2).await.unwrap();
        assert!(
            Arc::ptr_eq(&first, &second),
            "same live limiter across renders"
        );
        second.acquire(0).await.unwrap();
    }

    #[tokio::test]
    async fn rate_limited_callback_fires_on_actual_limit_only() {
        let (mut tree, _) = tree_with_provider(1);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let provider = tree.find_first(tree.root(), NodeKind::ClaudeProvider).unwrap();
        tree.get_mut(provider).props.set(
            "onRateLimited",
            crate::tree::PropValue::Callback(Arc::new(move |_| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            })),
        );
        let claude = tree.find_first(tree.root(), NodeKind::Claude).unwrap();

        let registry = ProviderRegistry::new();
        registry.sync_from_tree(&tree).await;
        let handle = registry.handle_for(&tree, claude).await.unwrap();

        handle.acquire(0).await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0, "granted acquire is not a limit event");
        let _ = handle.acquire(0).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1, "blocked acquire fires once");
    }

    #[tokio::test]
    async fn usage_rolls_up_across_providers() {
        let (tree, claude) = tree_with_provider(10);
        let registry = ProviderRegistry::new();
        registry.sync_from_tree(&tree).await;
        let handle = registry.handle_for(&tree, claude).await.unwrap();
        handle
            .record(
                "claude-sonnet-4-5",
                TokenUsage {
                    input_tokens: 100,
                    output_tokens: 20,
                },
            )
            .await;
        let total = registry.total_usage().await;
        assert_eq!(total.total_tokens, 120);
        assert_eq!(total.total_requests, 1);
    }
}
