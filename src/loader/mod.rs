//! # Agent-file loading
//!
//! The engine consumes workflows through one seam: something that turns a
//! source file into a renderable root [`Element`]. Markup loaders (MDX,
//! TSX) are external collaborators that register themselves here; the crate
//! ships a JSON plan loader and a registry for compiled-in workflow
//! factories (the Rust rendition of a typed-source default export: a
//! zero-arg function returning an element).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::render::Element;
use crate::tree::{NodeKind, PropValue, Props};

/// Loader failures, classified for the CLI's exit-code mapping.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("syntax error in {path} at line {line}, column {column}: {message}")]
    Syntax {
        path: String,
        line: usize,
        column: usize,
        message: String,
        /// The offending line with a caret marker, when available.
        frame: Option<String>,
    },
    #[error("{path} does not export a workflow: {message}")]
    Export { path: String, message: String },
    #[error("invalid element from {origin}: {message}")]
    InvalidElement { origin: String, message: String },
    #[error("no loader registered for '.{0}' files")]
    UnsupportedExtension(String),
    #[error("no workflow registered under the name '{0}'")]
    UnknownWorkflow(String),
}

/// A source-file loader for one or more file extensions.
pub trait AgentFileLoader: Send + Sync {
    fn extensions(&self) -> &[&'static str];

    fn load(&self, path: &Path) -> Result<Element, LoaderError>;
}

/// A compiled-in workflow: a zero-arg factory returning the root element.
pub type WorkflowFactory = Arc<dyn Fn() -> Element + Send + Sync>;

/// Extension-dispatched loader registry plus named workflow factories.
pub struct LoaderRegistry {
    loaders: Vec<Box<dyn AgentFileLoader>>,
    workflows: HashMap<String, WorkflowFactory>,
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        let mut registry = Self {
            loaders: Vec::new(),
            workflows: HashMap::new(),
        };
        registry.register_loader(Box::new(JsonPlanLoader));
        registry
    }
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_loader(&mut self, loader: Box<dyn AgentFileLoader>) {
        self.loaders.push(loader);
    }

    /// Register a compiled-in workflow under a name. The factory must
    /// return a node or fragment element; component roots are accepted too.
    pub fn register_workflow(&mut self, name: impl Into<String>, factory: WorkflowFactory) {
        self.workflows.insert(name.into(), factory);
    }

    /// Load a workflow file, dispatching on its extension.
    pub fn load_agent_file(&self, path: &Path) -> Result<Element, LoaderError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        for loader in &self.loaders {
            if loader.extensions().contains(&extension.as_str()) {
                return loader.load(path);
            }
        }
        Err(LoaderError::UnsupportedExtension(extension))
    }

    /// Resolve a named compiled-in workflow.
    pub fn load_workflow(&self, name: &str) -> Result<Element, LoaderError> {
        let factory = self
            .workflows
            .get(name)
            .ok_or_else(|| LoaderError::UnknownWorkflow(name.to_string()))?;
        Ok(factory())
    }
}

/// Built-in loader for `.json` plan documents.
///
/// A document is either one element object, an array of them (rendered as a
/// fragment), or a bare string (text). Element objects carry `type`,
/// optional `props`, and optional `children`.
pub struct JsonPlanLoader;

impl AgentFileLoader for JsonPlanLoader {
    fn extensions(&self) -> &[&'static str] {
        &["json"]
    }

    fn load(&self, path: &Path) -> Result<Element, LoaderError> {
        let display = path.display().to_string();
        let source = std::fs::read_to_string(path).map_err(|source| LoaderError::Io {
            path: display.clone(),
            source,
        })?;
        let document: serde_json::Value =
            serde_json::from_str(&source).map_err(|err| syntax_error(&display, &source, err))?;
        element_from_json(&document, &display)
    }
}

fn syntax_error(path: &str, source: &str, err: serde_json::Error) -> LoaderError {
    let line = err.line();
    let column = err.column();
    let frame = source.lines().nth(line.saturating_sub(1)).map(|text| {
        format!("{text}\n{}^", " ".repeat(column.saturating_sub(1)))
    });
    LoaderError::Syntax {
        path: path.to_string(),
        line,
        column,
        message: err.to_string(),
        frame,
    }
}

/// Convert a plan JSON value into an element.
pub fn element_from_json(value: &serde_json::Value, origin: &str) -> Result<Element, LoaderError> {
    match value {
        serde_json::Value::String(text) => Ok(Element::text(text.clone())),
        serde_json::Value::Array(items) => {
            let children = items
                .iter()
                .map(|item| element_from_json(item, origin))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Element::fragment(children))
        }
        serde_json::Value::Object(object) => {
            let tag = object
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| LoaderError::InvalidElement {
                    origin: origin.to_string(),
                    message: "element object is missing a 'type' field".to_string(),
                })?;
            let kind = NodeKind::from_tag(tag).ok_or_else(|| LoaderError::InvalidElement {
                origin: origin.to_string(),
                message: format!("unknown element type '{tag}'"),
            })?;
            let mut props = Props::new();
            if let Some(prop_object) = object.get("props") {
                let entries =
                    prop_object
                        .as_object()
                        .ok_or_else(|| LoaderError::InvalidElement {
                            origin: origin.to_string(),
                            message: "'props' must be an object".to_string(),
                        })?;
                for (key, prop_value) in entries {
                    props.set(key.clone(), PropValue::from(prop_value.clone()));
                }
            }
            let mut children = Vec::new();
            if let Some(child_values) = object.get("children") {
                let items = child_values
                    .as_array()
                    .ok_or_else(|| LoaderError::InvalidElement {
                        origin: origin.to_string(),
                        message: "'children' must be an array".to_string(),
                    })?;
                for item in items {
                    children.push(element_from_json(item, origin)?);
                }
            }
            Ok(Element::Node {
                kind,
                props,
                children,
            })
        }
        other => Err(LoaderError::InvalidElement {
            origin: origin.to_string(),
            message: format!("expected an element object, array, or string, got {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_plan(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_a_json_plan() {
        let file = write_plan(
            r#"{"type": "claude", "props": {"model": "sonnet"}, "children": ["Say hello."]}"#,
        );
        let registry = LoaderRegistry::new();
        let element = registry.load_agent_file(file.path()).unwrap();
        match element {
            Element::Node { kind, props, children } => {
                assert_eq!(kind, NodeKind::Claude);
                assert_eq!(props.str_prop("model"), Some("sonnet"));
                assert_eq!(children.len(), 1);
            }
            other => panic!("unexpected element: {other:?}"),
        }
    }

    #[test]
    fn syntax_errors_carry_position_and_frame() {
        let file = write_plan("{\n  \"type\": claude\n}");
        let registry = LoaderRegistry::new();
        match registry.load_agent_file(file.path()) {
            Err(LoaderError::Syntax { line, column, frame, .. }) => {
                assert_eq!(line, 2);
                assert!(column > 0);
                let frame = frame.unwrap();
                assert!(frame.contains("claude"));
                assert!(frame.contains('^'));
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_invalid_element() {
        let file = write_plan(r#"{"type": "widget"}"#);
        let registry = LoaderRegistry::new();
        assert!(matches!(
            registry.load_agent_file(file.path()),
            Err(LoaderError::InvalidElement { .. })
        ));
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let registry = LoaderRegistry::new();
        assert!(matches!(
            registry.load_agent_file(Path::new("workflow.yaml")),
            Err(LoaderError::UnsupportedExtension(ext)) if ext == "yaml"
        ));
    }

    #[test]
    fn named_workflows_resolve_through_factories() {
        let mut registry = LoaderRegistry::new();
        registry.register_workflow(
            "hello",
            Arc::new(|| crate::render::dsl::claude().text("Say hello.").build()),
        );
        assert!(registry.load_workflow("hello").is_ok());
        assert!(matches!(
            registry.load_workflow("missing"),
            Err(LoaderError::UnknownWorkflow(_))
        ));
    }
}
