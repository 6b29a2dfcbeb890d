//! Workflow state: the store author callbacks write into.
//!
//! State changes are modeled as messages. A `set` from a callback only queues
//! the update; nothing is visible to readers until the scheduler calls
//! [`StateHandle::flush_pending_updates`] between frames. The flush applies
//! every queued update, bumps the version, and yields to the runtime twice so
//! updates queued *during* a flush-triggered callback are themselves applied
//! before the next render.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Read-only view of the applied state at a point in time.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    values: HashMap<String, serde_json::Value>,
}

impl StateSnapshot {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Default)]
struct StateInner {
    applied: Mutex<HashMap<String, serde_json::Value>>,
    pending: Mutex<Vec<(String, serde_json::Value)>>,
    version: AtomicU64,
}

/// Cloneable handle to the workflow state store.
#[derive(Debug, Clone, Default)]
pub struct StateHandle {
    inner: Arc<StateInner>,
}

impl StateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an update. Visible only after the next flush.
    pub fn set(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.inner
            .pending
            .lock()
            .expect("state lock poisoned")
            .push((key.into(), value.into()));
    }

    /// Read an applied value.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner
            .applied
            .lock()
            .expect("state lock poisoned")
            .get(key)
            .cloned()
    }

    /// Whether updates are queued but not yet applied.
    pub fn has_pending(&self) -> bool {
        !self.inner.pending.lock().expect("state lock poisoned").is_empty()
    }

    /// Monotonic counter bumped once per applied update; the scheduler
    /// compares versions across a frame to detect state changes.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    /// Snapshot of the applied values, taken at the top of each frame.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            values: self
                .inner
                .applied
                .lock()
                .expect("state lock poisoned")
                .clone(),
        }
    }

    /// Apply every queued update, then yield cooperatively twice so updates
    /// queued during the first application round are drained as well.
    pub async fn flush_pending_updates(&self) {
        for _ in 0..2 {
            self.apply_pending();
            tokio::task::yield_now().await;
        }
        self.apply_pending();
    }

    fn apply_pending(&self) {
        let drained: Vec<(String, serde_json::Value)> = {
            let mut pending = self.inner.pending.lock().expect("state lock poisoned");
            pending.drain(..).collect()
        };
        if drained.is_empty() {
            return;
        }
        let mut applied = self.inner.applied.lock().expect("state lock poisoned");
        for (key, value) in drained {
            applied.insert(key, value);
            self.inner.version.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_is_invisible_until_flush() {
        let state = StateHandle::new();
        state.set("step", 1);
        assert_eq!(state.get("step"), None);
        assert!(state.has_pending());

        state.flush_pending_updates().await;
        assert_eq!(state.get("step"), Some(serde_json::json!(1)));
        assert!(!state.has_pending());
    }

    #[tokio::test]
    async fn version_bumps_per_applied_update() {
        let state = StateHandle::new();
        let before = state.version();
        state.set("a", 1);
        state.set("b", 2);
        state.flush_pending_updates().await;
        assert_eq!(state.version(), before + 2);

        // Flushing with nothing queued is a no-op.
        state.flush_pending_updates().await;
        assert_eq!(state.version(), before + 2);
    }

    #[tokio::test]
    async fn snapshot_is_stable_against_later_writes() {
        let state = StateHandle::new();
        state.set("step", 1);
        state.flush_pending_updates().await;
        let snap = state.snapshot();

        state.set("step", 2);
        state.flush_pending_updates().await;
        assert_eq!(snap.get_i64("step"), Some(1));
        assert_eq!(state.get("step"), Some(serde_json::json!(2)));
    }
}
