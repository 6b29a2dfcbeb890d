//! # Agent executors
//!
//! Three executor variants behind one dispatch surface, selected by node
//! kind:
//!
//! - **[`sdk`]** (`claude`): queries an opaque [`AgentBackend`]; the default
//!   backend drives the Claude Code CLI in stream-json mode.
//! - **[`api`]** (`claude-api`): the direct messages-API client with the
//!   tool loop, SSE streaming, and rate-limit retries.
//! - **[`cli`]** (`claude-cli`): a plain `claude --print` subprocess.
//!
//! Mock mode short-circuits all three. Every failure is wrapped in an
//! [`ExecutionError`] carrying the node kind, node path, and a prompt
//! preview.

/// Shared executor types, node config decoding, and the error taxonomy.
pub mod types;

/// Prompt construction and plan/prompt separation.
pub mod prompt;

/// Rate-limit retry policy with exponential backoff.
pub mod retry;

/// Direct messages-API executor and SSE parsing.
pub mod api;

/// Subprocess executor.
pub mod cli;

/// Opaque-backend executor and the default CLI-backed backend.
pub mod sdk;

/// Mock executor and JSON extraction.
pub mod mock;

use std::sync::Arc;

use crate::tools::ToolDef;
use crate::tree::{NodeId, NodeKind, Tree};

pub use api::{execute_api_node, AnthropicClient, ANTHROPIC_API_URL};
pub use cli::execute_cli_node;
pub use mock::{execute_mock_node, extract_json_object};
pub use prompt::{build_prompt, BuiltPrompt};
pub use retry::{with_rate_limit_retry, RetryPolicy};
pub use sdk::{
    execute_sdk_node, AgentBackend, AgentMessage, AgentQueryOptions, ClaudeCodeBackend,
};
pub use types::{
    AgentError, AgentNodeConfig, AgentOutcome, AgentOutput, ExecuteContext, ExecutionError,
    StreamCallback, StreamEvent, TokenUsage, ToolUseEvent,
};

/// Executor dependencies owned by the scheduler for the run. The API client
/// is created lazily from the environment the first time a `claude-api` node
/// executes outside mock mode.
#[derive(Clone)]
pub struct ExecutorDeps {
    pub backend: Arc<dyn AgentBackend>,
    pub api_client: Option<AnthropicClient>,
    pub retry: RetryPolicy,
}

impl Default for ExecutorDeps {
    fn default() -> Self {
        Self {
            backend: Arc::new(ClaudeCodeBackend),
            api_client: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl ExecutorDeps {
    fn api_client(&self) -> Result<AnthropicClient, AgentError> {
        match &self.api_client {
            Some(client) => Ok(client.clone()),
            None => AnthropicClient::from_env(),
        }
    }
}

/// Dispatch one agent node to the executor its kind selects, wrapping any
/// failure with node context.
pub async fn execute_agent_node(
    deps: &ExecutorDeps,
    tree: &Tree,
    node: NodeId,
    config: &AgentNodeConfig,
    built: &BuiltPrompt,
    tools: &[ToolDef],
    ctx: &ExecuteContext,
) -> Result<AgentOutcome, ExecutionError> {
    let input = built.user_message();
    let wrap = |source: AgentError| ExecutionError::wrap(tree, node, &input, source);

    if ctx.mock {
        return Ok(execute_mock_node(config, built));
    }

    match tree.get(node).kind {
        NodeKind::Claude => execute_sdk_node(&deps.backend, config, built, ctx)
            .await
            .map_err(wrap),
        NodeKind::ClaudeApi => {
            let client = deps.api_client().map_err(wrap)?;
            execute_api_node(&client, config, built, tools, ctx, &deps.retry)
                .await
                .map_err(wrap)
        }
        NodeKind::ClaudeCli => execute_cli_node(config, built, ctx).await.map_err(wrap),
        other => Err(wrap(AgentError::InvalidNode(format!(
            "'{}' is not an agent node",
            other.tag()
        )))),
    }
}
