//! Prompt construction: splitting a node's children into prompt body, system
//! message, and executable plan.
//!
//! Immediate children partition three ways:
//! - TEXT chunks concatenate into the prompt body, whitespace untouched.
//! - Semantic components (`persona`, `constraints`, `output-format`) shape
//!   the conversation: personas compose into the system message, the rest
//!   serialize into the prompt as XML tags.
//! - Everything else is the plan: serialized with `path` attributes and
//!   handed to the agent together with the `render_node` addendum.

use crate::tree::{serialize, serialize_with_paths, NodeId, NodeKind, Tree};

/// System-prompt suffix attached whenever a plan is present.
const PLAN_ADDENDUM: &str = "The user message ends with an XML plan. Each element carries a \
path attribute. To execute a plan node, invoke the render_node tool with that node's path and \
use the returned result. Execute nodes in source order unless instructed otherwise.";

/// The assembled prompt for one agent node.
#[derive(Debug, Clone, Default)]
pub struct BuiltPrompt {
    pub prompt: String,
    pub system: Option<String>,
    /// Present iff the node carries plan children.
    pub plan_xml: Option<String>,
}

impl BuiltPrompt {
    /// Full user-message text: prompt body plus the plan, if any.
    pub fn user_message(&self) -> String {
        match &self.plan_xml {
            Some(plan) if !self.prompt.is_empty() => format!("{}\n\n{}", self.prompt, plan),
            Some(plan) => plan.clone(),
            None => self.prompt.clone(),
        }
    }
}

/// Build the prompt for an agent node, given its optional explicit system
/// prop.
pub fn build_prompt(tree: &Tree, node: NodeId, explicit_system: Option<&str>) -> BuiltPrompt {
    let mut prompt = String::new();
    let mut plan_parts: Vec<String> = Vec::new();
    let mut personas: Vec<String> = Vec::new();

    for &child in &tree.get(node).children {
        match tree.get(child).kind {
            NodeKind::Text => {
                prompt.push_str(tree.get(child).text_value().unwrap_or_default());
            }
            NodeKind::Persona => {
                personas.push(persona_text(tree, child));
            }
            NodeKind::Constraints | NodeKind::OutputFormat => {
                // Semantic components appear in the prompt as their XML tags.
                prompt.push_str(&serialize(tree, child));
                prompt.push('\n');
            }
            _ => {
                plan_parts.push(serialize_with_paths(tree, child));
            }
        }
    }

    let plan_xml = if plan_parts.is_empty() {
        None
    } else {
        Some(plan_parts.join("\n"))
    };

    let mut system_parts: Vec<String> = Vec::new();
    if let Some(explicit) = explicit_system {
        system_parts.push(explicit.to_string());
    }
    system_parts.extend(personas);
    if plan_xml.is_some() {
        system_parts.push(PLAN_ADDENDUM.to_string());
    }
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    BuiltPrompt {
        prompt,
        system,
        plan_xml,
    }
}

fn persona_text(tree: &Tree, persona: NodeId) -> String {
    let body = tree.subtree_text(persona);
    let body = body.trim();
    match tree.get(persona).props.str_prop("role") {
        Some(role) if body.is_empty() => format!("You are a {role}."),
        Some(role) => format!("You are a {role}. {body}"),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Props;

    fn text_child(tree: &mut Tree, parent: NodeId, text: &str) {
        let t = tree.create_text_instance(text);
        tree.append_child(parent, t);
    }

    #[test]
    fn text_only_node_is_a_plain_prompt() {
        let mut tree = Tree::new();
        let claude = tree.create_instance(NodeKind::Claude, Props::new());
        text_child(&mut tree, claude, "Say hello.");

        let built = build_prompt(&tree, claude, None);
        assert_eq!(built.prompt, "Say hello.");
        assert!(built.plan_xml.is_none());
        assert!(built.system.is_none());
        assert_eq!(built.user_message(), "Say hello.");
    }

    #[test]
    fn plan_children_split_from_prompt_text() {
        let mut tree = Tree::new();
        let claude = tree.create_instance(NodeKind::Claude, Props::new());
        text_child(&mut tree, claude, "Work through the plan:\n");
        let task = tree.create_instance(NodeKind::Task, Props::new());
        text_child(&mut tree, task, "first step");
        tree.append_child(claude, task);

        let built = build_prompt(&tree, claude, None);
        assert_eq!(built.prompt, "Work through the plan:\n");
        assert!(built.user_message().starts_with("Work through the plan:"));
        let plan = built.plan_xml.expect("plan present");
        assert!(plan.contains("path=\""));
        assert!(built.system.unwrap().contains("render_node"));
    }

    #[test]
    fn personas_compose_into_system_message() {
        let mut tree = Tree::new();
        let claude = tree.create_instance(NodeKind::Claude, Props::new());
        let mut persona_props = Props::new();
        persona_props.set("role", "senior-engineer");
        let persona = tree.create_instance(NodeKind::Persona, persona_props);
        text_child(&mut tree, persona, "Expert reviewer.");
        tree.append_child(claude, persona);
        text_child(&mut tree, claude, "Review the diff.");

        let built = build_prompt(&tree, claude, Some("Be concise."));
        let system = built.system.unwrap();
        assert!(system.starts_with("Be concise."));
        assert!(system.contains("You are a senior-engineer. Expert reviewer."));
        assert_eq!(built.prompt, "Review the diff.");
        assert!(built.plan_xml.is_none(), "persona is not plan content");
    }

    #[test]
    fn constraints_render_into_prompt_as_xml() {
        let mut tree = Tree::new();
        let claude = tree.create_instance(NodeKind::Claude, Props::new());
        let constraints = tree.create_instance(NodeKind::Constraints, Props::new());
        text_child(&mut tree, constraints, "No external crates.");
        tree.append_child(claude, constraints);
        text_child(&mut tree, claude, "Write the module.");

        let built = build_prompt(&tree, claude, None);
        assert!(built.prompt.contains("<constraints>"));
        assert!(built.prompt.contains("No external crates."));
        assert!(built.prompt.contains("Write the module."));
    }

    #[test]
    fn whitespace_between_chunks_is_preserved() {
        let mut tree = Tree::new();
        let claude = tree.create_instance(NodeKind::Claude, Props::new());
        text_child(&mut tree, claude, "before  ");
        let task = tree.create_instance(NodeKind::Task, Props::new());
        tree.append_child(claude, task);
        text_child(&mut tree, claude, "  after");

        let built = build_prompt(&tree, claude, None);
        assert_eq!(built.prompt, "before    after");
    }
}
