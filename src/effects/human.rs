//! Human approval gates.
//!
//! A human node pauses the loop until the caller's prompt callback decides.
//! Satisfied gates are remembered in the approval set as `path:contentHash`
//! pairs, so the same gate never re-prompts across frames while an edited
//! gate (same path, different body) prompts again.

use crate::tree::{content_hash, node_path, NodeId, Tree};

/// Everything the scheduler needs to prompt for one gate.
#[derive(Debug, Clone)]
pub struct HumanGate {
    pub message: String,
    /// Flattened TEXT content of the node, shown alongside the message.
    pub body: String,
    pub node_path: String,
    pub content_hash: String,
}

impl HumanGate {
    pub fn extract(tree: &Tree, node: NodeId) -> Self {
        Self {
            message: tree
                .get(node)
                .props
                .str_prop("message")
                .unwrap_or("Approve to continue?")
                .to_string(),
            body: tree.subtree_text(node),
            node_path: node_path(tree, node),
            content_hash: content_hash(tree, node),
        }
    }

    /// Key recorded in the approval set once this gate is satisfied.
    pub fn approval_key(&self) -> String {
        format!("{}:{}", self.node_path, self.content_hash)
    }
}
