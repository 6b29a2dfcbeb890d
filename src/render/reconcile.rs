//! Reconciliation: turning element output into host-op mutations.
//!
//! Each frame the scheduler calls [`render`] with the root element and a
//! fresh [`RenderScope`]. Components are expanded, fragments flattened, and
//! the resolved children are matched positionally against the retained tree:
//! same kind in the same slot updates in place, anything else is replaced.
//! Commits are synchronous; by the time `render` returns the tree is final
//! for the frame.

use crate::render::element::{Element, RenderScope};
use crate::tree::{NodeId, NodeKind, Props, Tree};

/// A resolved element after component expansion and fragment flattening.
enum Resolved {
    Node {
        kind: NodeKind,
        props: Props,
        children: Vec<Resolved>,
    },
    Text(String),
}

/// Render `element` into `tree`, reconciling against the retained children
/// of ROOT. Returns the container (ROOT) id.
pub fn render(tree: &mut Tree, element: &Element, scope: &RenderScope) -> NodeId {
    let root = tree.root();
    let resolved = resolve(element, scope);
    reconcile_children(tree, root, resolved);
    root
}

/// Release the retained tree by rendering empty output into it.
pub fn unmount(tree: &mut Tree) {
    reconcile_children(tree, tree.root(), Vec::new());
}

/// True iff the proposed children coalesce to a single text payload (one
/// string or number child), matching the host text-content contract.
pub fn should_set_text_content(children: &[Element]) -> bool {
    matches!(children, [Element::Text(_)])
}

fn resolve(element: &Element, scope: &RenderScope) -> Vec<Resolved> {
    match element {
        Element::Text(text) => vec![Resolved::Text(text.clone())],
        Element::Fragment(children) => children
            .iter()
            .flat_map(|child| resolve(child, scope))
            .collect(),
        Element::Component(f) => {
            let produced = f(scope);
            resolve(&produced, scope)
        }
        Element::Node {
            kind,
            props,
            children,
        } => {
            let resolved_children = children
                .iter()
                .flat_map(|child| resolve(child, scope))
                .collect();
            vec![Resolved::Node {
                kind: *kind,
                props: props.clone(),
                children: resolved_children,
            }]
        }
    }
}

fn reconcile_children(tree: &mut Tree, parent: NodeId, new_children: Vec<Resolved>) {
    let old_children = tree.get(parent).children.clone();
    let mut next_children: Vec<NodeId> = Vec::with_capacity(new_children.len());

    for (index, resolved) in new_children.into_iter().enumerate() {
        let reusable = old_children.get(index).copied().filter(|&old| {
            kind_matches(tree, old, &resolved)
        });
        match (reusable, resolved) {
            (Some(old), Resolved::Text(text)) => {
                if tree.get(old).text_value() != Some(text.as_str()) {
                    tree.commit_text_update(old, text);
                }
                next_children.push(old);
            }
            (Some(old), Resolved::Node { props, children, .. }) => {
                if let Some(payload) = tree.prepare_update(old, &props) {
                    tree.commit_update(old, payload);
                }
                reconcile_children(tree, old, children);
                next_children.push(old);
            }
            (None, resolved) => {
                next_children.push(mount(tree, resolved));
            }
        }
    }

    // Detach old children that were not reused; their subtrees become
    // unreachable along with any execution state they carried.
    for &old in &old_children {
        if !next_children.contains(&old) {
            tree.remove_child(parent, old);
        }
    }

    // Re-appending in order fixes positions after replacements; append_child
    // detaches before attaching, so the final order is exactly
    // `next_children`.
    for &child in &next_children {
        tree.append_child(parent, child);
    }
}

fn kind_matches(tree: &Tree, old: NodeId, resolved: &Resolved) -> bool {
    match resolved {
        Resolved::Text(_) => tree.get(old).kind == NodeKind::Text,
        Resolved::Node { kind, .. } => tree.get(old).kind == *kind,
    }
}

fn mount(tree: &mut Tree, resolved: Resolved) -> NodeId {
    match resolved {
        Resolved::Text(text) => tree.create_text_instance(text),
        Resolved::Node {
            kind,
            props,
            children,
        } => {
            let node = tree.create_instance(kind, props);
            for child in children {
                let child_id = mount(tree, child);
                tree.append_initial_child(node, child_id);
            }
            node
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::element::dsl;
    use crate::render::state::StateHandle;
    use crate::tree::content_hash;

    fn scope(frame: u32) -> RenderScope {
        RenderScope {
            frame,
            state: StateHandle::new().snapshot(),
        }
    }

    #[test]
    fn mounts_and_remounts_identically() {
        let element = dsl::claude().prop("model", "sonnet").text("Say hello.").build();
        let mut tree = Tree::new();
        render(&mut tree, &element, &scope(0));
        let claude = tree.get(tree.root()).children[0];
        let first_hash = content_hash(&tree, claude);

        render(&mut tree, &element, &scope(1));
        let claude_again = tree.get(tree.root()).children[0];
        assert_eq!(claude, claude_again, "same slot node is reused");
        assert_eq!(first_hash, content_hash(&tree, claude_again));
    }

    #[test]
    fn execution_state_survives_rerender_of_same_node() {
        let element = dsl::claude().text("work").build();
        let mut tree = Tree::new();
        render(&mut tree, &element, &scope(0));
        let claude = tree.get(tree.root()).children[0];
        tree.get_mut(claude).execution = Some(crate::tree::ExecutionState::pending());

        render(&mut tree, &element, &scope(1));
        assert!(tree.get(claude).execution.is_some());
    }

    #[test]
    fn kind_mismatch_replaces_node() {
        let mut tree = Tree::new();
        render(&mut tree, &dsl::claude().text("a").build(), &scope(0));
        let first = tree.get(tree.root()).children[0];

        render(&mut tree, &dsl::stop().build(), &scope(1));
        let second = tree.get(tree.root()).children[0];
        assert_ne!(first, second);
        assert_eq!(tree.get(second).kind, NodeKind::Stop);
        assert_eq!(tree.get(first).parent, None, "old node is detached");
    }

    #[test]
    fn component_sees_state_snapshot() {
        let state = StateHandle::new();
        let element = Element::component(move |scope: &RenderScope| {
            if scope.state.get_i64("step") == Some(2) {
                dsl::stop().prop("reason", "done").build()
            } else {
                dsl::claude().text("advance").build()
            }
        });

        let mut tree = Tree::new();
        let s0 = RenderScope {
            frame: 0,
            state: state.snapshot(),
        };
        render(&mut tree, &element, &s0);
        assert_eq!(
            tree.get(tree.get(tree.root()).children[0]).kind,
            NodeKind::Claude
        );

        futures::executor::block_on(async {
            state.set("step", 2);
            state.flush_pending_updates().await;
        });
        let s1 = RenderScope {
            frame: 1,
            state: state.snapshot(),
        };
        render(&mut tree, &element, &s1);
        assert_eq!(
            tree.get(tree.get(tree.root()).children[0]).kind,
            NodeKind::Stop
        );
    }

    #[test]
    fn fragments_flatten_into_siblings() {
        let element = Element::fragment(vec![
            dsl::file().prop("path", "/tmp/a").build(),
            dsl::claude().text("work").build(),
        ]);
        let mut tree = Tree::new();
        render(&mut tree, &element, &scope(0));
        let kinds: Vec<NodeKind> = tree
            .get(tree.root())
            .children
            .iter()
            .map(|&c| tree.get(c).kind)
            .collect();
        assert_eq!(kinds, vec![NodeKind::File, NodeKind::Claude]);
    }

    #[test]
    fn text_content_predicate() {
        assert!(should_set_text_content(&[Element::text("only")]));
        assert!(!should_set_text_content(&[
            Element::text("a"),
            Element::text("b")
        ]));
        assert!(!should_set_text_content(&[dsl::stop().build()]));
    }

    #[test]
    fn unmount_clears_root_children() {
        let mut tree = Tree::new();
        render(&mut tree, &dsl::claude().text("x").build(), &scope(0));
        assert!(!tree.get(tree.root()).children.is_empty());
        unmount(&mut tree);
        assert!(tree.get(tree.root()).children.is_empty());
    }
}
