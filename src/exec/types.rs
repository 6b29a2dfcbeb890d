//! Shared executor types: node configuration, outputs, streaming events, and
//! the error taxonomy.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tools::{ToolDef, ToolError};
use crate::tree::{NodeId, Props, Tree};

/// Token accounting for a single agent call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// What an executor produced: plain text, or a structured value when the
/// node declared an output schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentOutput {
    Text(String),
    Structured(serde_json::Value),
}

impl AgentOutput {
    pub fn as_json(&self) -> serde_json::Value {
        match self {
            AgentOutput::Text(s) => serde_json::Value::String(s.clone()),
            AgentOutput::Structured(v) => v.clone(),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            AgentOutput::Text(s) => s.clone(),
            AgentOutput::Structured(v) => v.to_string(),
        }
    }
}

/// Output plus accounting, handed back to the scheduler.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub output: AgentOutput,
    pub usage: Option<TokenUsage>,
    pub model: String,
}

/// Streaming event delivered through `on_stream` while a call is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Text {
        text: String,
    },
    ToolUse {
        tool_use: ToolUseEvent,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseEvent {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

pub type StreamCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Per-dispatch context assembled by the scheduler.
#[derive(Clone, Default)]
pub struct ExecuteContext {
    /// Resolved mock mode for this dispatch.
    pub mock: bool,
    /// Working directory injected by the nearest worktree ancestor.
    pub cwd: Option<PathBuf>,
    pub on_stream: Option<StreamCallback>,
    pub verbose: bool,
}

/// Agent node configuration decoded from props. Unknown props are ignored;
/// they still serialize into the plan.
#[derive(Debug, Clone, Default)]
pub struct AgentNodeConfig {
    pub model: Option<String>,
    pub max_tokens: Option<u64>,
    pub max_turns: Option<u32>,
    pub max_tool_iterations: u32,
    pub system: Option<String>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub permission_mode: Option<String>,
    pub cwd: Option<PathBuf>,
    pub mcp_servers: Vec<String>,
    pub schema: Option<serde_json::Value>,
    pub resume: Option<String>,
    pub additional_directories: Vec<String>,
    pub setting_sources: Vec<String>,
    pub subagents: Option<serde_json::Value>,
    pub max_budget_usd: Option<f64>,
    pub max_thinking_tokens: Option<u64>,
    pub stream: bool,
    pub tools: Vec<ToolDef>,
}

impl AgentNodeConfig {
    pub fn from_props(props: &Props) -> Self {
        Self {
            model: props.str_prop("model").map(str::to_string),
            max_tokens: props.int_prop("maxTokens").map(|n| n as u64),
            max_turns: props.int_prop("maxTurns").map(|n| n as u32),
            max_tool_iterations: props
                .int_prop("maxToolIterations")
                .map(|n| n as u32)
                .unwrap_or(10),
            system: props
                .str_prop("system")
                .or_else(|| props.str_prop("systemPrompt"))
                .map(str::to_string),
            allowed_tools: string_list(props, "allowedTools"),
            disallowed_tools: string_list(props, "disallowedTools"),
            permission_mode: props.str_prop("permissionMode").map(str::to_string),
            cwd: props.str_prop("cwd").map(PathBuf::from),
            mcp_servers: string_list(props, "mcpServers"),
            schema: props.get("schema").map(|v| v.to_json()),
            resume: props.str_prop("resume").map(str::to_string),
            additional_directories: string_list(props, "additionalDirectories"),
            setting_sources: string_list(props, "settingSources"),
            subagents: props.get("subagents").map(|v| v.to_json()),
            max_budget_usd: props.get("maxBudgetUsd").and_then(|v| v.as_f64()),
            max_thinking_tokens: props.int_prop("maxThinkingTokens").map(|n| n as u64),
            stream: props.bool_prop("stream").unwrap_or(false),
            tools: props
                .get("tools")
                .and_then(|v| v.as_tools())
                .map(<[ToolDef]>::to_vec)
                .unwrap_or_default(),
        }
    }
}

fn string_list(props: &Props, key: &str) -> Vec<String> {
    match props.get(key) {
        Some(value) => match value.as_str() {
            // A comma-separated string is accepted alongside a JSON array.
            Some(s) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => value
                .to_json()
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
        },
        None => Vec::new(),
    }
}

/// Errors raised while executing a single agent node.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("Anthropic API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("structured output error: {0}")]
    StructuredOutput(String),
    #[error("agent subprocess failed with exit code {code}: {stderr}")]
    Subprocess { code: i32, stderr: String },
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("invalid agent node: {0}")]
    InvalidNode(String),
    #[error("missing API key: set ANTHROPIC_API_KEY or enable mock mode")]
    MissingApiKey,
    #[error("{0}")]
    Other(String),
}

/// Wrapper attached to every executor failure so the scheduler's error path
/// and the event stream carry the location of the fault.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{node_kind} node at {node_path} failed: {source}")]
pub struct ExecutionError {
    pub node_kind: String,
    pub node_path: String,
    /// Prompt preview (truncated) for diagnostics.
    pub input: String,
    #[source]
    pub source: AgentError,
}

impl ExecutionError {
    pub fn wrap(tree: &Tree, node: NodeId, input: &str, source: AgentError) -> Self {
        const PREVIEW: usize = 200;
        let input = if input.len() > PREVIEW {
            let cut = input
                .char_indices()
                .take_while(|(i, _)| *i < PREVIEW)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0);
            format!("{}…", &input[..cut])
        } else {
            input.to_string()
        };
        Self {
            node_kind: tree.get(node).kind.tag().to_string(),
            node_path: crate::tree::node_path(tree, node),
            input,
            source,
        }
    }
}
