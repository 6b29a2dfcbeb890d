//! Execution store and approval set.
//!
//! The store maps node paths to their last execution record. Keying by path
//! (not hash) means an in-place edit is detected as *same identity, changed
//! content*: the stored hash no longer matches, restore leaves the node
//! unset, and the node re-executes. The approval set remembers satisfied
//! human gates as `path:contentHash` pairs.

use std::collections::{HashMap, HashSet};

use crate::tree::{
    content_hash, node_path, ExecutionState, ExecutionStatus, NodeId, NodeKind, Tree,
};

/// Node kinds whose execution records persist across frames.
pub fn is_executable(kind: NodeKind) -> bool {
    kind.is_agent() || matches!(kind, NodeKind::File | NodeKind::Worktree)
}

/// Path-keyed execution records, owned by the scheduler and touched only
/// between frames.
#[derive(Debug, Clone, Default)]
pub struct ExecutionStore {
    entries: HashMap<String, ExecutionState>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&ExecutionState> {
        self.entries.get(path)
    }

    pub fn insert(&mut self, path: String, state: ExecutionState) {
        self.entries.insert(path, state);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Attach stored execution state to a freshly rendered tree.
    ///
    /// For every executable node with a store entry: matching content hash
    /// restores the record verbatim, a differing hash leaves the node unset
    /// so it re-executes. A `blocked_by_worktree` record whose worktree
    /// ancestors have all healed is also left unset. Idempotent: applying
    /// twice in a row changes nothing.
    pub fn restore(&self, tree: &mut Tree) {
        let nodes = tree.walk(tree.root());
        for node in nodes {
            if !is_executable(tree.get(node).kind) {
                continue;
            }
            let path = node_path(tree, node);
            let Some(entry) = self.entries.get(&path) else {
                continue;
            };
            let current_hash = content_hash(tree, node);
            if entry.content_hash.as_deref() != Some(current_hash.as_str()) {
                tree.get_mut(node).execution = None;
                continue;
            }
            if entry.blocked_by_worktree && !has_failed_worktree_ancestor(tree, node) {
                // The blocking worktree healed; clear the stale error so the
                // node executes this frame.
                tree.get_mut(node).execution = None;
                continue;
            }
            tree.get_mut(node).execution = Some(entry.clone());
        }
    }

    /// Persist the tree's execution records back to the store, keyed by
    /// path and indexed by current content hash.
    pub fn persist(&mut self, tree: &Tree) {
        for node in tree.walk(tree.root()) {
            if !is_executable(tree.get(node).kind) {
                continue;
            }
            if let Some(execution) = tree.get(node).execution.clone() {
                self.entries.insert(node_path(tree, node), execution);
            }
        }
    }
}

/// Whether any worktree ancestor of `node` is currently in error.
pub fn has_failed_worktree_ancestor(tree: &Tree, node: NodeId) -> bool {
    tree.ancestors(node).into_iter().any(|ancestor| {
        tree.get(ancestor).kind == NodeKind::Worktree
            && tree
                .get(ancestor)
                .execution
                .as_ref()
                .is_some_and(|e| e.status == ExecutionStatus::Error)
    })
}

/// Satisfied human gates, keyed `path:contentHash`.
#[derive(Debug, Clone, Default)]
pub struct ApprovalSet {
    approved: HashSet<String>,
}

impl ApprovalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.approved.contains(key)
    }

    pub fn insert(&mut self, key: String) {
        self.approved.insert(key);
    }

    pub fn len(&self) -> usize {
        self.approved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Props;

    fn claude_tree(text: &str) -> (Tree, NodeId) {
        let mut tree = Tree::new();
        let root = tree.root();
        let claude = tree.create_instance(NodeKind::Claude, Props::new());
        let t = tree.create_text_instance(text);
        tree.append_child(root, claude);
        tree.append_child(claude, t);
        (tree, claude)
    }

    #[test]
    fn restore_reattaches_matching_hash() {
        let (mut tree, claude) = claude_tree("work");
        let hash = content_hash(&tree, claude);
        let mut store = ExecutionStore::new();
        store.insert(
            node_path(&tree, claude),
            ExecutionState::complete(hash, serde_json::json!("done")),
        );

        store.restore(&mut tree);
        let execution = tree.get(claude).execution.as_ref().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Complete);
        assert_eq!(execution.result, Some(serde_json::json!("done")));
    }

    #[test]
    fn restore_clears_on_hash_mismatch() {
        let (mut tree, claude) = claude_tree("work");
        let mut store = ExecutionStore::new();
        store.insert(
            node_path(&tree, claude),
            ExecutionState::complete("stale-hash".to_string(), serde_json::json!("old")),
        );

        store.restore(&mut tree);
        assert!(tree.get(claude).execution.is_none(), "edited node re-executes");
    }

    #[test]
    fn restore_is_idempotent() {
        let (mut tree, claude) = claude_tree("work");
        let hash = content_hash(&tree, claude);
        let mut store = ExecutionStore::new();
        store.insert(
            node_path(&tree, claude),
            ExecutionState::complete(hash, serde_json::json!(1)),
        );

        store.restore(&mut tree);
        let once = tree.get(claude).execution.clone();
        store.restore(&mut tree);
        assert_eq!(tree.get(claude).execution, once);
    }

    #[test]
    fn healed_worktree_clears_blocked_error() {
        let mut tree = Tree::new();
        let root = tree.root();
        let mut wt_props = Props::new();
        wt_props.set("path", "/tmp/wt");
        wt_props.set("branch", "main");
        let worktree = tree.create_instance(NodeKind::Worktree, wt_props);
        let claude = tree.create_instance(NodeKind::Claude, Props::new());
        tree.append_child(root, worktree);
        tree.append_child(worktree, claude);

        let claude_hash = content_hash(&tree, claude);
        let wt_hash = content_hash(&tree, worktree);
        let mut store = ExecutionStore::new();
        store.insert(
            node_path(&tree, claude),
            ExecutionState::blocked_by_worktree(claude_hash, "/tmp/wt"),
        );
        // The worktree now has a complete record.
        store.insert(
            node_path(&tree, worktree),
            ExecutionState::complete(wt_hash, serde_json::json!("/tmp/wt")),
        );

        store.restore(&mut tree);
        assert!(
            tree.get(claude).execution.is_none(),
            "blocked error cleared once the worktree healed"
        );
    }

    #[test]
    fn blocked_error_survives_while_worktree_is_failed() {
        let mut tree = Tree::new();
        let root = tree.root();
        let mut wt_props = Props::new();
        wt_props.set("path", "/tmp/wt");
        wt_props.set("branch", "..bad");
        let worktree = tree.create_instance(NodeKind::Worktree, wt_props);
        let claude = tree.create_instance(NodeKind::Claude, Props::new());
        tree.append_child(root, worktree);
        tree.append_child(worktree, claude);

        let claude_hash = content_hash(&tree, claude);
        let wt_hash = content_hash(&tree, worktree);
        let mut store = ExecutionStore::new();
        store.insert(
            node_path(&tree, claude),
            ExecutionState::blocked_by_worktree(claude_hash, "/tmp/wt"),
        );
        store.insert(
            node_path(&tree, worktree),
            ExecutionState::failed(wt_hash, "invalid branch"),
        );

        store.restore(&mut tree);
        let execution = tree.get(claude).execution.as_ref().unwrap();
        assert!(execution.blocked_by_worktree);
        assert_eq!(execution.status, ExecutionStatus::Error);
    }

    #[test]
    fn persist_then_restore_round_trips() {
        let (mut tree, claude) = claude_tree("work");
        let hash = content_hash(&tree, claude);
        tree.get_mut(claude).execution =
            Some(ExecutionState::complete(hash, serde_json::json!("out")));

        let mut store = ExecutionStore::new();
        store.persist(&tree);
        tree.get_mut(claude).execution = None;
        store.restore(&mut tree);
        assert_eq!(
            tree.get(claude).execution.as_ref().unwrap().result,
            Some(serde_json::json!("out"))
        );
    }
}
