//! Node paths: the primary identity used by the execution store.
//!
//! A path has the shape `ROOT/phase[0]/claude[1]` where each index counts
//! prior siblings *of the same kind*, not sibling position. Two nodes of
//! different kinds at the same position therefore never collide, and paths
//! stay stable when an unrelated sibling of another kind is inserted.

use std::collections::HashMap;

use super::node::{NodeId, NodeKind, Tree};

/// Path of a single node.
pub fn node_path(tree: &Tree, id: NodeId) -> String {
    let node = tree.get(id);
    let Some(parent) = node.parent else {
        return "ROOT".to_string();
    };
    let mut same_kind_index = 0usize;
    for &sibling in &tree.get(parent).children {
        if sibling == id {
            break;
        }
        if tree.get(sibling).kind == node.kind {
            same_kind_index += 1;
        }
    }
    format!(
        "{}/{}[{}]",
        node_path(tree, parent),
        node.kind.tag(),
        same_kind_index
    )
}

/// Paths for every element node (TEXT excluded) under `root`, in source
/// order. The mapping is a bijection for any given tree.
pub fn generate_node_paths(tree: &Tree, root: NodeId) -> HashMap<String, NodeId> {
    let mut out = HashMap::new();
    for id in tree.walk(root) {
        if tree.get(id).kind == NodeKind::Text {
            continue;
        }
        out.insert(node_path(tree, id), id);
    }
    out
}

/// Resolve a path produced by [`node_path`] back to a node, if present.
pub fn resolve_path(tree: &Tree, root: NodeId, path: &str) -> Option<NodeId> {
    let mut segments = path.split('/');
    if segments.next()? != "ROOT" {
        return None;
    }
    let mut current = root;
    for segment in segments {
        let open = segment.find('[')?;
        let tag = &segment[..open];
        let index: usize = segment[open + 1..segment.len().checked_sub(1)?]
            .parse()
            .ok()?;
        let kind = NodeKind::from_tag(tag)?;
        let mut seen = 0usize;
        let mut found = None;
        for &child in &tree.get(current).children {
            if tree.get(child).kind == kind {
                if seen == index {
                    found = Some(child);
                    break;
                }
                seen += 1;
            }
        }
        current = found?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::node::Props;

    fn sample_tree() -> (Tree, NodeId, NodeId, NodeId) {
        let mut tree = Tree::new();
        let root = tree.root();
        let phase = tree.create_instance(NodeKind::Phase, Props::new());
        let a = tree.create_instance(NodeKind::Claude, Props::new());
        let file = tree.create_instance(NodeKind::File, Props::new());
        let b = tree.create_instance(NodeKind::Claude, Props::new());
        tree.append_child(root, phase);
        tree.append_child(phase, a);
        tree.append_child(phase, file);
        tree.append_child(phase, b);
        (tree, a, file, b)
    }

    #[test]
    fn indices_count_same_kind_siblings_only() {
        let (tree, a, file, b) = sample_tree();
        assert_eq!(node_path(&tree, a), "ROOT/phase[0]/claude[0]");
        assert_eq!(node_path(&tree, file), "ROOT/phase[0]/file[0]");
        // The file sibling between the two claude nodes does not shift the
        // claude index.
        assert_eq!(node_path(&tree, b), "ROOT/phase[0]/claude[1]");
    }

    #[test]
    fn generated_paths_are_a_bijection() {
        let (tree, ..) = sample_tree();
        let paths = generate_node_paths(&tree, tree.root());
        assert_eq!(paths.len(), 5); // ROOT, phase, claude x2, file
        let mut ids: Vec<NodeId> = paths.values().copied().collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), paths.len());
    }

    #[test]
    fn resolve_round_trips() {
        let (tree, a, file, b) = sample_tree();
        for id in [a, file, b] {
            let path = node_path(&tree, id);
            assert_eq!(resolve_path(&tree, tree.root(), &path), Some(id));
        }
        assert_eq!(resolve_path(&tree, tree.root(), "ROOT/phase[0]/claude[9]"), None);
        assert_eq!(resolve_path(&tree, tree.root(), "bogus"), None);
    }
}
