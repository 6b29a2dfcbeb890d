//! XML plan serialization.
//!
//! The serialized plan doubles as the user-facing preview and as agent input,
//! so the output is deterministic: child order is source order, attribute
//! order is prop insertion order with `key` hoisted first, and entities are
//! escaped `&` first so already-escaped text is never double-encoded. No XML
//! declaration, DOCTYPE, or namespaces are emitted.

use super::node::{NodeId, NodeKind, PropValue, Tree};
use super::path::node_path;

/// Props that never serialize as attributes even though they are public.
const SKIPPED_ATTRS: &[&str] = &["children", "value", "onFinished", "onError", "_mockMode"];

/// Serialize the subtree rooted at `id`.
pub fn serialize(tree: &Tree, id: NodeId) -> String {
    serialize_inner(tree, id, false)
}

/// Serialize with a `path="…"` attribute on every element, for plan prompts
/// handed to agents that execute nodes via the `render_node` tool.
pub fn serialize_with_paths(tree: &Tree, id: NodeId) -> String {
    serialize_inner(tree, id, true)
}

fn serialize_inner(tree: &Tree, id: NodeId, with_paths: bool) -> String {
    let node = tree.get(id);
    match node.kind {
        NodeKind::Text => escape_text(node.text_value().unwrap_or_default()),
        NodeKind::Root => node
            .children
            .iter()
            .map(|&child| serialize_inner(tree, child, with_paths))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => {
            let tag = node.kind.tag();
            let attrs = render_attributes(tree, id, with_paths);
            if node.children.is_empty() {
                format!("<{tag}{attrs} />")
            } else {
                let body = node
                    .children
                    .iter()
                    .map(|&child| indent(&serialize_inner(tree, child, with_paths)))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("<{tag}{attrs}>\n{body}\n</{tag}>")
            }
        }
    }
}

fn render_attributes(tree: &Tree, id: NodeId, with_paths: bool) -> String {
    let node = tree.get(id);
    let mut out = String::new();

    // `key` is emitted first regardless of where it was inserted.
    if let Some(key) = node.props.get("key")
        && !matches!(key, PropValue::Null)
    {
        push_attr(&mut out, "key", key);
    }
    for (name, value) in node.props.public_iter() {
        if name == "key" || SKIPPED_ATTRS.contains(&name) {
            continue;
        }
        if matches!(value, PropValue::Null) {
            continue;
        }
        push_attr(&mut out, name, value);
    }
    if with_paths {
        out.push_str(&format!(" path=\"{}\"", escape_attr(&node_path(tree, id))));
    }
    out
}

fn push_attr(out: &mut String, name: &str, value: &PropValue) {
    out.push_str(&format!(" {name}=\"{}\"", escape_attr(&attr_lexical(value))));
}

/// Lexical form of an attribute value: strings and primitives verbatim,
/// arrays and objects as JSON.
fn attr_lexical(value: &PropValue) -> String {
    match value {
        PropValue::String(s) => s.clone(),
        PropValue::Bool(b) => b.to_string(),
        PropValue::Int(n) => n.to_string(),
        PropValue::Float(x) => x.to_string(),
        PropValue::Json(serde_json::Value::String(s)) => s.clone(),
        PropValue::Json(v) => serde_json::to_string(v).unwrap_or_default(),
        PropValue::Tools(_) => serde_json::to_string(&value.to_json()).unwrap_or_default(),
        PropValue::Null | PropValue::Callback(_) => String::new(),
    }
}

/// Escape text content. `&` is replaced first so entities produced by the
/// later replacements are never re-encoded.
pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape an attribute value: the five XML entities, `&` first.
pub fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn indent(block: &str) -> String {
    block
        .lines()
        .map(|line| {
            if line.is_empty() {
                line.to_string()
            } else {
                format!("  {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::node::Props;

    #[test]
    fn empty_element_self_closes() {
        let mut tree = Tree::new();
        let mut props = Props::new();
        props.set("reason", "done");
        let stop = tree.create_instance(NodeKind::Stop, props);
        assert_eq!(serialize(&tree, stop), r#"<stop reason="done" />"#);
    }

    #[test]
    fn root_joins_children_without_wrapper() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.create_instance(NodeKind::Stop, Props::new());
        let b = tree.create_instance(NodeKind::Stop, Props::new());
        tree.append_child(root, a);
        tree.append_child(root, b);
        assert_eq!(serialize(&tree, root), "<stop />\n<stop />");
    }

    #[test]
    fn children_are_indented_and_in_source_order() {
        let mut tree = Tree::new();
        let mut props = Props::new();
        props.set("model", "claude-sonnet-4-5-20250929");
        let claude = tree.create_instance(NodeKind::Claude, props);

        let mut persona_props = Props::new();
        persona_props.set("role", "senior-engineer");
        let persona = tree.create_instance(NodeKind::Persona, persona_props);
        let persona_text = tree.create_text_instance("Expert reviewer.");
        tree.append_child(persona, persona_text);

        let prompt = tree.create_text_instance("Review the diff.");
        tree.append_child(claude, persona);
        tree.append_child(claude, prompt);

        let xml = serialize(&tree, claude);
        assert_eq!(
            xml,
            "<claude model=\"claude-sonnet-4-5-20250929\">\n  <persona role=\"senior-engineer\">\n    Expert reviewer.\n  </persona>\n  Review the diff.\n</claude>"
        );
    }

    #[test]
    fn attribute_escaping_never_double_encodes() {
        let mut tree = Tree::new();
        let mut props = Props::new();
        props.set("message", "a & b < c \"quoted\" 'single'");
        let human = tree.create_instance(NodeKind::Human, props);
        let xml = serialize(&tree, human);
        assert_eq!(
            xml,
            r#"<human message="a &amp; b &lt; c &quot;quoted&quot; &apos;single&apos;" />"#
        );
        assert!(!xml.contains("&amp;amp;"));
    }

    #[test]
    fn key_attribute_comes_first() {
        let mut tree = Tree::new();
        let mut props = Props::new();
        props.set("model", "sonnet");
        props.set("key", "reviewer");
        let claude = tree.create_instance(NodeKind::Claude, props);
        assert_eq!(
            serialize(&tree, claude),
            r#"<claude key="reviewer" model="sonnet" />"#
        );
    }

    #[test]
    fn null_value_and_callback_props_are_omitted() {
        let mut tree = Tree::new();
        let mut props = Props::new();
        props.set("path", "/tmp/out.txt");
        props.set("value", "hidden");
        props.set("encoding", PropValue::Null);
        props.set(
            "onFinished",
            PropValue::Callback(std::sync::Arc::new(|_| {})),
        );
        let file = tree.create_instance(NodeKind::File, props);
        assert_eq!(serialize(&tree, file), r#"<file path="/tmp/out.txt" />"#);
    }

    #[test]
    fn arrays_and_objects_render_as_json() {
        let mut tree = Tree::new();
        let mut props = Props::new();
        props.set("allowedTools", serde_json::json!(["Read", "Write"]));
        props.set("budget", serde_json::json!({"maxTokens": 1000}));
        let claude = tree.create_instance(NodeKind::Claude, props);
        assert_eq!(
            serialize(&tree, claude),
            r#"<claude allowedTools="[&quot;Read&quot;,&quot;Write&quot;]" budget="{&quot;maxTokens&quot;:1000}" />"#
        );
    }

    #[test]
    fn text_whitespace_is_preserved() {
        let mut tree = Tree::new();
        let claude = tree.create_instance(NodeKind::Claude, Props::new());
        let leading = tree.create_text_instance("  leading and trailing  ");
        tree.append_child(claude, leading);
        let xml = serialize(&tree, claude);
        assert!(xml.contains("leading and trailing  "));
    }

    #[test]
    fn serialize_with_paths_adds_path_attributes() {
        let mut tree = Tree::new();
        let root = tree.root();
        let task = tree.create_instance(NodeKind::Task, Props::new());
        let claude = tree.create_instance(NodeKind::Claude, Props::new());
        tree.append_child(root, task);
        tree.append_child(task, claude);
        let xml = serialize_with_paths(&tree, task);
        assert!(xml.contains(r#"<task path="ROOT/task[0]">"#));
        assert!(xml.contains(r#"<claude path="ROOT/task[0]/claude[0]" />"#));
    }

    #[test]
    fn numeric_and_boolean_props_use_lexical_form() {
        let mut tree = Tree::new();
        let mut props = Props::new();
        props.set("maxTurns", 5i64);
        props.set("parallel", true);
        props.set("temperature", 0.5);
        let claude = tree.create_instance(NodeKind::Claude, props);
        assert_eq!(
            serialize(&tree, claude),
            r#"<claude maxTurns="5" parallel="true" temperature="0.5" />"#
        );
    }
}
