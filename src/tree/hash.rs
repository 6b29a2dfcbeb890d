//! Content hashing: the idempotence key for node re-execution.
//!
//! The hash covers a node's kind, its public props (non-callable, not
//! `children`, not underscore-reserved), and its children: TEXT payloads
//! directly, element children by recursive hash. Prop order is insertion
//! order, which the renderer preserves, so structurally identical renders
//! hash identically.

use sha2::{Digest, Sha256};

use super::node::{NodeId, NodeKind, PropValue, Tree};

/// Deterministic fingerprint of the subtree rooted at `id`.
pub fn content_hash(tree: &Tree, id: NodeId) -> String {
    let mut hasher = Sha256::new();
    hash_into(tree, id, &mut hasher);
    let digest = hasher.finalize();
    // 16 bytes of digest keeps store keys readable without weakening the
    // collision bound for per-run identity.
    hex_encode(&digest[..16])
}

fn hash_into(tree: &Tree, id: NodeId, hasher: &mut Sha256) {
    let node = tree.get(id);
    hasher.update(node.kind.tag().as_bytes());
    hasher.update(b"\x1f");
    for (key, value) in node.props.public_iter() {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(stable_stringify(value).as_bytes());
        hasher.update(b"\x1f");
    }
    for &child in &node.children {
        if tree.get(child).kind == NodeKind::Text {
            hasher.update(b"text:");
            hasher.update(
                tree.get(child)
                    .text_value()
                    .unwrap_or_default()
                    .as_bytes(),
            );
        } else {
            hasher.update(content_hash(tree, child).as_bytes());
        }
        hasher.update(b"\x1f");
    }
}

/// Stringify a prop value deterministically. Each non-string primitive gets
/// an explicit type prefix so values of different types never collapse to
/// the same encoding. `PropValue` is an ownership tree, so no cycle guard is
/// needed.
pub fn stable_stringify(value: &PropValue) -> String {
    match value {
        PropValue::Null => "null".to_string(),
        PropValue::Bool(b) => format!("bool:{b}"),
        PropValue::Int(n) => format!("int:{n}"),
        PropValue::Float(x) => format!("float:{x}"),
        PropValue::String(s) => format!("str:{s}"),
        // Compact JSON; serde_json preserves map insertion order, keeping
        // the encoding stable across renders that build props identically.
        PropValue::Json(v) => format!("json:{}", serde_json::to_string(v).unwrap_or_default()),
        PropValue::Callback(_) => String::new(),
        PropValue::Tools(tools) => {
            let schemas: Vec<serde_json::Value> =
                tools.iter().map(|t| t.schema_json()).collect();
            format!(
                "tools:{}",
                serde_json::to_string(&schemas).unwrap_or_default()
            )
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::node::Props;
    use std::sync::Arc;

    fn claude_with_text(tree: &mut Tree, model: &str, text: &str) -> NodeId {
        let mut props = Props::new();
        props.set("model", model);
        let node = tree.create_instance(NodeKind::Claude, props);
        let t = tree.create_text_instance(text);
        tree.append_child(node, t);
        node
    }

    #[test]
    fn identical_subtrees_hash_identically() {
        let mut tree = Tree::new();
        let a = claude_with_text(&mut tree, "sonnet", "Say hello.");
        let b = claude_with_text(&mut tree, "sonnet", "Say hello.");
        assert_eq!(content_hash(&tree, a), content_hash(&tree, b));
    }

    #[test]
    fn prop_change_changes_hash() {
        let mut tree = Tree::new();
        let a = claude_with_text(&mut tree, "sonnet", "Say hello.");
        let before = content_hash(&tree, a);
        tree.get_mut(a).props.set("model", "opus");
        assert_ne!(before, content_hash(&tree, a));
    }

    #[test]
    fn text_change_changes_hash() {
        let mut tree = Tree::new();
        let a = claude_with_text(&mut tree, "sonnet", "Say hello.");
        let before = content_hash(&tree, a);
        let text = tree.get(a).children[0];
        tree.commit_text_update(text, "Say goodbye.");
        assert_ne!(before, content_hash(&tree, a));
    }

    #[test]
    fn callbacks_and_underscore_props_do_not_affect_hash() {
        let mut tree = Tree::new();
        let a = claude_with_text(&mut tree, "sonnet", "Say hello.");
        let before = content_hash(&tree, a);
        tree.get_mut(a)
            .props
            .set("onFinished", PropValue::Callback(Arc::new(|_| {})));
        tree.get_mut(a).props.set("_mockMode", true);
        assert_eq!(before, content_hash(&tree, a));
    }

    #[test]
    fn typed_primitives_do_not_collapse() {
        assert_ne!(
            stable_stringify(&PropValue::String("1".into())),
            stable_stringify(&PropValue::Int(1))
        );
        assert_ne!(
            stable_stringify(&PropValue::Bool(true)),
            stable_stringify(&PropValue::String("true".into()))
        );
    }
}
