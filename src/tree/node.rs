//! Node arena and core data model for the rendered workflow graph.
//!
//! A [`Tree`] owns every node produced by the renderer. Nodes reference each
//! other through [`NodeId`] arena indices rather than pointers, so the parent
//! back-reference is a plain relation and the graph stays cycle-free by
//! construction. Detached nodes become unreachable; slots are not reused
//! within a run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::tools::ToolDef;

/// Discriminant for every node the renderer can materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Root,
    Text,
    Claude,
    ClaudeApi,
    ClaudeCli,
    Subagent,
    Phase,
    Step,
    Persona,
    Constraints,
    OutputFormat,
    Task,
    Stop,
    Human,
    File,
    Worktree,
    Output,
    ClaudeProvider,
}

impl NodeKind {
    /// Lowercase tag name used in serialized plans and markup sources.
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::Root => "ROOT",
            NodeKind::Text => "TEXT",
            NodeKind::Claude => "claude",
            NodeKind::ClaudeApi => "claude-api",
            NodeKind::ClaudeCli => "claude-cli",
            NodeKind::Subagent => "subagent",
            NodeKind::Phase => "phase",
            NodeKind::Step => "step",
            NodeKind::Persona => "persona",
            NodeKind::Constraints => "constraints",
            NodeKind::OutputFormat => "output-format",
            NodeKind::Task => "task",
            NodeKind::Stop => "stop",
            NodeKind::Human => "human",
            NodeKind::File => "file",
            NodeKind::Worktree => "worktree",
            NodeKind::Output => "output",
            NodeKind::ClaudeProvider => "claude-provider",
        }
    }

    /// Parse a tag name back into a kind. `ROOT` and `TEXT` are internal and
    /// intentionally not parseable from plan sources.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "claude" => NodeKind::Claude,
            "claude-api" => NodeKind::ClaudeApi,
            "claude-cli" => NodeKind::ClaudeCli,
            "subagent" => NodeKind::Subagent,
            "phase" => NodeKind::Phase,
            "step" => NodeKind::Step,
            "persona" => NodeKind::Persona,
            "constraints" => NodeKind::Constraints,
            "output-format" => NodeKind::OutputFormat,
            "task" => NodeKind::Task,
            "stop" => NodeKind::Stop,
            "human" => NodeKind::Human,
            "file" => NodeKind::File,
            "worktree" => NodeKind::Worktree,
            "output" => NodeKind::Output,
            "claude-provider" => NodeKind::ClaudeProvider,
            _ => return None,
        })
    }

    /// Agent nodes are the executable leaves the scheduler dispatches to an
    /// executor variant.
    pub fn is_agent(&self) -> bool {
        matches!(
            self,
            NodeKind::Claude | NodeKind::ClaudeApi | NodeKind::ClaudeCli
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Callback props (`on_finished`, `on_error`, `on_written`, ...) carried on a
/// node. Invoked by the scheduler with a JSON payload; authors close over
/// state handles to feed results back into the next render.
pub type PropCallback = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// A single prop value. Callback and tool-executor values are excluded from
/// serialization and content hashing, matching the callable-exclusion rule of
/// the plan format.
#[derive(Clone)]
pub enum PropValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Json(serde_json::Value),
    Callback(PropCallback),
    Tools(Vec<ToolDef>),
}

impl PropValue {
    pub fn is_callable(&self) -> bool {
        matches!(self, PropValue::Callback(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::String(s) => Some(s),
            PropValue::Json(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(b) => Some(*b),
            PropValue::Json(serde_json::Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropValue::Int(n) => Some(*n),
            PropValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            PropValue::Json(v) => v.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropValue::Int(n) => Some(*n as f64),
            PropValue::Float(f) => Some(*f),
            PropValue::Json(v) => v.as_f64(),
            _ => None,
        }
    }

    pub fn as_callback(&self) -> Option<&PropCallback> {
        match self {
            PropValue::Callback(cb) => Some(cb),
            _ => None,
        }
    }

    pub fn as_tools(&self) -> Option<&[ToolDef]> {
        match self {
            PropValue::Tools(tools) => Some(tools),
            _ => None,
        }
    }

    /// JSON projection used by the serializer and hash. Callables map to
    /// `Null` (callers skip them before reaching here); tools drop their
    /// executors.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PropValue::Null => serde_json::Value::Null,
            PropValue::Bool(b) => serde_json::Value::Bool(*b),
            PropValue::Int(n) => serde_json::json!(n),
            PropValue::Float(f) => serde_json::json!(f),
            PropValue::String(s) => serde_json::Value::String(s.clone()),
            PropValue::Json(v) => v.clone(),
            PropValue::Callback(_) => serde_json::Value::Null,
            PropValue::Tools(tools) => serde_json::Value::Array(
                tools.iter().map(ToolDef::schema_json).collect(),
            ),
        }
    }

    /// Structural equality ignoring callbacks (two distinct closures never
    /// compare equal, so a callback prop change alone does not force a prop
    /// update payload).
    pub fn same_value(&self, other: &PropValue) -> bool {
        match (self, other) {
            (PropValue::Null, PropValue::Null) => true,
            (PropValue::Bool(a), PropValue::Bool(b)) => a == b,
            (PropValue::Int(a), PropValue::Int(b)) => a == b,
            (PropValue::Float(a), PropValue::Float(b)) => a == b,
            (PropValue::String(a), PropValue::String(b)) => a == b,
            (PropValue::Json(a), PropValue::Json(b)) => a == b,
            (PropValue::Callback(a), PropValue::Callback(b)) => Arc::ptr_eq(a, b),
            (PropValue::Tools(a), PropValue::Tools(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.schema_json() == y.schema_json())
            }
            _ => false,
        }
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Null => write!(f, "Null"),
            PropValue::Bool(b) => write!(f, "Bool({b})"),
            PropValue::Int(n) => write!(f, "Int({n})"),
            PropValue::Float(x) => write!(f, "Float({x})"),
            PropValue::String(s) => write!(f, "String({s:?})"),
            PropValue::Json(v) => write!(f, "Json({v})"),
            PropValue::Callback(_) => write!(f, "Callback(..)"),
            PropValue::Tools(t) => write!(f, "Tools(len={})", t.len()),
        }
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        PropValue::String(s.to_string())
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        PropValue::String(s)
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> Self {
        PropValue::Bool(b)
    }
}

impl From<i64> for PropValue {
    fn from(n: i64) -> Self {
        PropValue::Int(n)
    }
}

impl From<f64> for PropValue {
    fn from(x: f64) -> Self {
        PropValue::Float(x)
    }
}

impl From<serde_json::Value> for PropValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => PropValue::Null,
            serde_json::Value::Bool(b) => PropValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PropValue::Int(i)
                } else {
                    PropValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => PropValue::String(s),
            other => PropValue::Json(other),
        }
    }
}

/// Ordered prop map. Insertion order is preserved and is the attribute order
/// of the serialized plan; setting an existing key updates it in place.
#[derive(Debug, Clone, Default)]
pub struct Props {
    entries: Vec<(String, PropValue)>,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<PropValue>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<PropValue> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn str_prop(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PropValue::as_str)
    }

    pub fn bool_prop(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(PropValue::as_bool)
    }

    pub fn int_prop(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(PropValue::as_i64)
    }

    pub fn callback(&self, key: &str) -> Option<PropCallback> {
        self.get(key).and_then(PropValue::as_callback).cloned()
    }

    /// Props that participate in serialization/hashing: not `children`, not
    /// underscore-reserved, not callable.
    pub fn public_iter(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.iter()
            .filter(|(k, v)| *k != "children" && !k.starts_with('_') && !v.is_callable())
    }
}

impl<K: Into<String>, V: Into<PropValue>> FromIterator<(K, V)> for Props {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut props = Props::new();
        for (k, v) in iter {
            props.set(k, v);
        }
        props
    }
}

/// Execution lifecycle status for an executable node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Complete,
    Error,
}

/// Per-node execution record. Persisted to the execution store keyed by node
/// path and gated by content hash on restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub blocked_by_worktree: bool,
}

impl ExecutionState {
    pub fn pending() -> Self {
        Self {
            status: ExecutionStatus::Pending,
            result: None,
            error: None,
            content_hash: None,
            blocked_by_worktree: false,
        }
    }

    pub fn running(content_hash: String) -> Self {
        Self {
            status: ExecutionStatus::Running,
            result: None,
            error: None,
            content_hash: Some(content_hash),
            blocked_by_worktree: false,
        }
    }

    pub fn complete(content_hash: String, result: serde_json::Value) -> Self {
        Self {
            status: ExecutionStatus::Complete,
            result: Some(result),
            error: None,
            content_hash: Some(content_hash),
            blocked_by_worktree: false,
        }
    }

    pub fn failed(content_hash: String, error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            result: None,
            error: Some(error.into()),
            content_hash: Some(content_hash),
            blocked_by_worktree: false,
        }
    }

    pub fn blocked_by_worktree(content_hash: String, worktree_path: &str) -> Self {
        Self {
            status: ExecutionStatus::Error,
            result: None,
            error: Some(format!("blocked by failed worktree at {worktree_path}")),
            content_hash: Some(content_hash),
            blocked_by_worktree: true,
        }
    }
}

/// Arena index of a node within its [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// A single node record.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub props: Props,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    pub execution: Option<ExecutionState>,
}

impl Node {
    fn new(kind: NodeKind, props: Props) -> Self {
        Self {
            kind,
            props,
            children: Vec::new(),
            parent: None,
            execution: None,
        }
    }

    /// Textual payload of a TEXT node.
    pub fn text_value(&self) -> Option<&str> {
        if self.kind == NodeKind::Text {
            self.props.str_prop("value")
        } else {
            None
        }
    }
}

/// The rendered node graph. Created once per run and mutated in place by the
/// reconciler across frames.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Tree {
    pub fn new() -> Self {
        let root = Node::new(NodeKind::Root, Props::new());
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub(crate) fn alloc(&mut self, kind: NodeKind, props: Props) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(kind, props));
        id
    }

    /// Pre-order walk starting at `id` (source order).
    pub fn walk(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            for &child in self.get(current).children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// All nodes of `kind` under `id`, in source order.
    pub fn find_all(&self, id: NodeId, kind: NodeKind) -> Vec<NodeId> {
        self.walk(id)
            .into_iter()
            .filter(|&n| self.get(n).kind == kind)
            .collect()
    }

    /// First node of `kind` under `id` in source order, if any.
    pub fn find_first(&self, id: NodeId, kind: NodeKind) -> Option<NodeId> {
        self.walk(id).into_iter().find(|&n| self.get(n).kind == kind)
    }

    /// Ancestors of `id`, nearest first, excluding `id` itself.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.get(id).parent;
        while let Some(p) = current {
            out.push(p);
            current = self.get(p).parent;
        }
        out
    }

    /// Nearest ancestor of the given kind.
    pub fn nearest_ancestor(&self, id: NodeId, kind: NodeKind) -> Option<NodeId> {
        self.ancestors(id)
            .into_iter()
            .find(|&a| self.get(a).kind == kind)
    }

    /// Flattened TEXT content of the immediate children of `id`.
    pub fn child_text(&self, id: NodeId) -> String {
        let mut out = String::new();
        for &child in &self.get(id).children {
            if let Some(value) = self.get(child).text_value() {
                out.push_str(value);
            }
        }
        out
    }

    /// Flattened TEXT content of the entire subtree under `id`, in source
    /// order. Used for prompt construction when a node has no plan children.
    pub fn subtree_text(&self, id: NodeId) -> String {
        let mut out = String::new();
        for n in self.walk(id) {
            if let Some(value) = self.get(n).text_value() {
                out.push_str(value);
            }
        }
        out
    }

    /// Whether any descendant of `id` is a non-TEXT element (i.e. the node
    /// carries plan children).
    pub fn has_plan_children(&self, id: NodeId) -> bool {
        self.get(id)
            .children
            .iter()
            .any(|&c| self.get(c).kind != NodeKind::Text)
    }

    /// Short display label for a node: its tag, plus a `name` prop when set.
    pub fn node_label(&self, id: NodeId) -> String {
        let node = self.get(id);
        match node.props.str_prop("name") {
            Some(name) => format!("{}({})", node.kind.tag(), name),
            None => node.kind.tag().to_string(),
        }
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}
