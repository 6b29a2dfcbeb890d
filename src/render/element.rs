//! Declarative elements: what authors build and components return.
//!
//! An [`Element`] is a value description of a subtree. Component elements
//! carry a closure that is re-invoked every frame with the current
//! [`RenderScope`], which is how state changes flow back into the tree: the
//! scope's frame number changes each frame, forcing reconciliation, and the
//! scope's state snapshot reflects all updates flushed since the last frame.

use std::fmt;
use std::sync::Arc;

use crate::render::state::StateSnapshot;
use crate::tree::{NodeKind, Props, PropValue};

/// Scope handed to component functions on every render.
#[derive(Debug, Clone)]
pub struct RenderScope {
    /// Frame counter; changes every frame so retained components always
    /// reconcile.
    pub frame: u32,
    /// Applied state values at the start of this frame.
    pub state: StateSnapshot,
}

/// A component: re-invoked each frame to produce fresh output.
pub type ComponentFn = Arc<dyn Fn(&RenderScope) -> Element + Send + Sync>;

/// Declarative description of a subtree.
#[derive(Clone)]
pub enum Element {
    Node {
        kind: NodeKind,
        props: Props,
        children: Vec<Element>,
    },
    Text(String),
    Component(ComponentFn),
    Fragment(Vec<Element>),
}

impl Element {
    pub fn node(kind: NodeKind) -> ElementBuilder {
        ElementBuilder {
            kind,
            props: Props::new(),
            children: Vec::new(),
        }
    }

    pub fn text(text: impl Into<String>) -> Element {
        Element::Text(text.into())
    }

    pub fn component<F>(f: F) -> Element
    where
        F: Fn(&RenderScope) -> Element + Send + Sync + 'static,
    {
        Element::Component(Arc::new(f))
    }

    pub fn fragment(children: Vec<Element>) -> Element {
        Element::Fragment(children)
    }

    /// Empty output; renders to nothing.
    pub fn empty() -> Element {
        Element::Fragment(Vec::new())
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Node { kind, children, .. } => f
                .debug_struct("Node")
                .field("kind", kind)
                .field("children", &children.len())
                .finish(),
            Element::Text(s) => write!(f, "Text({s:?})"),
            Element::Component(_) => write!(f, "Component(..)"),
            Element::Fragment(children) => write!(f, "Fragment(len={})", children.len()),
        }
    }
}

/// Builder for node elements.
pub struct ElementBuilder {
    kind: NodeKind,
    props: Props,
    children: Vec<Element>,
}

impl ElementBuilder {
    pub fn prop(mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props.set(key, value);
        self
    }

    pub fn callback<F>(mut self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.props.set(key, PropValue::Callback(Arc::new(f)));
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.child(Element::Text(text.into()))
    }

    pub fn build(self) -> Element {
        Element::Node {
            kind: self.kind,
            props: self.props,
            children: self.children,
        }
    }
}

/// Shorthand constructors for the component namespace.
pub mod dsl {
    use super::*;

    pub fn claude() -> ElementBuilder {
        Element::node(NodeKind::Claude)
    }

    pub fn claude_api() -> ElementBuilder {
        Element::node(NodeKind::ClaudeApi)
    }

    pub fn claude_cli() -> ElementBuilder {
        Element::node(NodeKind::ClaudeCli)
    }

    pub fn subagent() -> ElementBuilder {
        Element::node(NodeKind::Subagent)
    }

    pub fn phase() -> ElementBuilder {
        Element::node(NodeKind::Phase)
    }

    pub fn step() -> ElementBuilder {
        Element::node(NodeKind::Step)
    }

    pub fn persona() -> ElementBuilder {
        Element::node(NodeKind::Persona)
    }

    pub fn constraints() -> ElementBuilder {
        Element::node(NodeKind::Constraints)
    }

    pub fn output_format() -> ElementBuilder {
        Element::node(NodeKind::OutputFormat)
    }

    pub fn task() -> ElementBuilder {
        Element::node(NodeKind::Task)
    }

    pub fn stop() -> ElementBuilder {
        Element::node(NodeKind::Stop)
    }

    pub fn human() -> ElementBuilder {
        Element::node(NodeKind::Human)
    }

    pub fn file() -> ElementBuilder {
        Element::node(NodeKind::File)
    }

    pub fn worktree() -> ElementBuilder {
        Element::node(NodeKind::Worktree)
    }

    pub fn output() -> ElementBuilder {
        Element::node(NodeKind::Output)
    }

    pub fn claude_provider() -> ElementBuilder {
        Element::node(NodeKind::ClaudeProvider)
    }
}
