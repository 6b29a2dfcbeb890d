//! Host operations invoked by the reconciler.
//!
//! These are the mutation primitives of the node graph: creation, attachment,
//! reordering, removal, and prop/text commits. They are infallible by
//! contract; errors from user component code surface at the `render` caller,
//! never from a host op.

use super::node::{NodeId, NodeKind, Props, PropValue, Tree};

/// Prop payload produced by [`Tree::prepare_update`] and consumed by
/// [`Tree::commit_update`].
#[derive(Debug, Clone)]
pub struct UpdatePayload {
    pub new_props: Props,
}

impl Tree {
    /// Create an element instance with the given kind and props. `children`
    /// is never stored as a prop; it lives in the child list.
    pub fn create_instance(&mut self, kind: NodeKind, mut props: Props) -> NodeId {
        props.remove("children");
        self.alloc(kind, props)
    }

    /// Create a TEXT instance whose payload is the `value` prop.
    pub fn create_text_instance(&mut self, text: impl Into<String>) -> NodeId {
        let mut props = Props::new();
        props.set("value", text.into());
        self.alloc(NodeKind::Text, props)
    }

    /// Attach `child` as the last child of `parent` during initial mount.
    pub fn append_initial_child(&mut self, parent: NodeId, child: NodeId) {
        self.append_child(parent, child);
    }

    /// Attach `child` as the last child of `parent`, detaching it from any
    /// previous parent first so the containment invariant holds.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.get_mut(parent).children.push(child);
        self.get_mut(child).parent = Some(parent);
    }

    /// Container variant of [`Tree::append_child`]; the container is ROOT.
    pub fn append_child_to_container(&mut self, container: NodeId, child: NodeId) {
        self.append_child(container, child);
    }

    /// Insert `child` immediately before `before` in `parent`'s child list.
    /// Falls back to append when `before` is not a current child.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, before: NodeId) {
        self.detach(child);
        let position = self
            .get(parent)
            .children
            .iter()
            .position(|&c| c == before);
        match position {
            Some(idx) => self.get_mut(parent).children.insert(idx, child),
            None => self.get_mut(parent).children.push(child),
        }
        self.get_mut(child).parent = Some(parent);
    }

    /// Container variant of [`Tree::insert_before`].
    pub fn insert_in_container_before(&mut self, container: NodeId, child: NodeId, before: NodeId) {
        self.insert_before(container, child, before);
    }

    /// Detach `child` from `parent` and clear its parent link.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        self.get_mut(parent).children.retain(|&c| c != child);
        self.get_mut(child).parent = None;
    }

    /// Container variant of [`Tree::remove_child`].
    pub fn remove_child_from_container(&mut self, container: NodeId, child: NodeId) {
        self.remove_child(container, child);
    }

    /// Replace the payload of a TEXT instance.
    pub fn commit_text_update(&mut self, text_instance: NodeId, new_text: impl Into<String>) {
        debug_assert_eq!(self.get(text_instance).kind, NodeKind::Text);
        self.get_mut(text_instance).props.set("value", new_text.into());
    }

    /// Returns an update payload iff any non-`children` prop changed between
    /// the current props and `new_props`. Callback identity changes alone do
    /// not count as a change.
    pub fn prepare_update(&self, node: NodeId, new_props: &Props) -> Option<UpdatePayload> {
        let current = &self.get(node).props;
        let changed = !props_equivalent(current, new_props);
        changed.then(|| UpdatePayload {
            new_props: new_props.clone(),
        })
    }

    /// Apply a prepared update: props are replaced wholesale (children are
    /// untouched; children are reconciled separately).
    pub fn commit_update(&mut self, node: NodeId, payload: UpdatePayload) {
        let mut props = payload.new_props;
        props.remove("children");
        self.get_mut(node).props = props;
    }

    fn detach(&mut self, child: NodeId) {
        if let Some(old_parent) = self.get(child).parent {
            self.get_mut(old_parent).children.retain(|&c| c != child);
            self.get_mut(child).parent = None;
        }
    }
}

fn props_equivalent(a: &Props, b: &Props) -> bool {
    let a_entries: Vec<(&str, &PropValue)> =
        a.iter().filter(|(k, _)| *k != "children").collect();
    let b_entries: Vec<(&str, &PropValue)> =
        b.iter().filter(|(k, _)| *k != "children").collect();
    if a_entries.len() != b_entries.len() {
        return false;
    }
    a_entries
        .iter()
        .zip(b_entries.iter())
        .all(|((ka, va), (kb, vb))| ka == kb && va.same_value(vb))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_remove_maintain_containment() {
        let mut tree = Tree::new();
        let root = tree.root();
        let phase = tree.create_instance(NodeKind::Phase, Props::new());
        let text = tree.create_text_instance("hello");

        tree.append_child_to_container(root, phase);
        tree.append_child(phase, text);
        assert_eq!(tree.get(phase).children, vec![text]);
        assert_eq!(tree.get(text).parent, Some(phase));

        tree.remove_child(phase, text);
        assert!(tree.get(phase).children.is_empty());
        assert_eq!(tree.get(text).parent, None);
    }

    #[test]
    fn insert_before_orders_children() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.create_instance(NodeKind::Step, Props::new());
        let b = tree.create_instance(NodeKind::Step, Props::new());
        let c = tree.create_instance(NodeKind::Step, Props::new());
        tree.append_child(root, a);
        tree.append_child(root, b);
        tree.insert_before(root, c, b);
        assert_eq!(tree.get(root).children, vec![a, c, b]);
    }

    #[test]
    fn reappend_moves_instead_of_duplicating() {
        let mut tree = Tree::new();
        let root = tree.root();
        let phase = tree.create_instance(NodeKind::Phase, Props::new());
        let step = tree.create_instance(NodeKind::Step, Props::new());
        tree.append_child(root, step);
        tree.append_child(root, phase);
        tree.append_child(phase, step);

        assert_eq!(tree.get(root).children, vec![phase]);
        assert_eq!(tree.get(phase).children, vec![step]);
        assert_eq!(tree.get(step).parent, Some(phase));
    }

    #[test]
    fn prepare_update_detects_prop_change() {
        let mut tree = Tree::new();
        let mut props = Props::new();
        props.set("model", "sonnet");
        let node = tree.create_instance(NodeKind::Claude, props.clone());

        assert!(tree.prepare_update(node, &props).is_none());

        let mut changed = Props::new();
        changed.set("model", "opus");
        let payload = tree.prepare_update(node, &changed).expect("change detected");
        tree.commit_update(node, payload);
        assert_eq!(tree.get(node).props.str_prop("model"), Some("opus"));
    }

    #[test]
    fn commit_text_update_replaces_value() {
        let mut tree = Tree::new();
        let text = tree.create_text_instance("old");
        tree.commit_text_update(text, "new");
        assert_eq!(tree.get(text).text_value(), Some("new"));
    }
}
