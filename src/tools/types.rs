//! Tool definitions and errors shared by executors and the server manager.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Async tool executor: JSON args in, JSON result out.
pub type ToolExecutorFn =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, ToolError>> + Send + Sync>;

/// Where a prepared tool came from; decides collision winners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOrigin {
    /// Defined inline on the node.
    Inline,
    /// Imported from a connected tool server.
    Remote { server: String },
    /// Injected by the engine (e.g. `render_node`).
    Builtin,
}

/// A tool definition: inline (author-provided, possibly with an executor),
/// remote (imported with a dispatch shim), or builtin.
#[derive(Clone)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    /// JSON-Schema input description. Required for api-mode inline tools;
    /// may be absent when only the legacy `parameters` shape was given.
    pub input_schema: Option<serde_json::Value>,
    /// Legacy `parameters` shape (a bare properties map). Converted once to
    /// a proper schema during preparation, with a deprecation warning.
    pub parameters: Option<serde_json::Value>,
    pub executor: Option<ToolExecutorFn>,
    pub origin: ToolOrigin,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: Some(input_schema),
            parameters: None,
            executor: None,
            origin: ToolOrigin::Inline,
        }
    }

    /// Construct from the deprecated `parameters` shape; normalized during
    /// tool preparation.
    pub fn with_legacy_parameters(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: None,
            parameters: Some(parameters),
            executor: None,
            origin: ToolOrigin::Inline,
        }
    }

    pub fn executor<F>(mut self, f: F) -> Self
    where
        F: Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, ToolError>>
            + Send
            + Sync
            + 'static,
    {
        self.executor = Some(Arc::new(f));
        self
    }

    /// Executor-free JSON projection: what serializes into plans and hashes.
    pub fn schema_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.input_schema.clone()
                .or_else(|| self.parameters.clone())
                .unwrap_or(serde_json::Value::Null),
        })
    }

    /// Wire shape for the messages API (`name`, `description`,
    /// `input_schema`).
    pub fn api_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.input_schema.clone().unwrap_or(serde_json::json!({
                "type": "object",
                "properties": {},
            })),
        })
    }
}

impl fmt::Debug for ToolDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDef")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("has_executor", &self.executor.is_some())
            .finish()
    }
}

/// Content block returned by a tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
}

/// Response from a tool-server call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            success: true,
            content: vec![ToolContent::Text { text: text.into() }],
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Joined text content.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ToolContent::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Spec of a tool exported by a server, before a dispatch shim is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("tool '{0}' not found")]
    NotFound(String),
    #[error("tool '{0}' has no executor")]
    NoExecutor(String),
    #[error("tool server '{0}' is not registered")]
    UnknownServer(String),
    #[error("tool server '{server}' error: {message}")]
    Server { server: String, message: String },
    #[error("tool '{tool}' failed: {message}")]
    ExecutionFailed { tool: String, message: String },
    #[error("inline tool '{0}' is missing an input_schema")]
    MissingSchema(String),
}
