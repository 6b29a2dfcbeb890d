//! Scheduler options, observer callbacks, and the engine error taxonomy.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

use crate::effects::{FileWriteError, WorktreeError};
use crate::engine::controller::ExecutionController;
use crate::engine::events::DebugOptions;
use crate::engine::result::FrameResult;
use crate::exec::{
    AgentBackend, AnthropicClient, ClaudeCodeBackend, ExecutionError, RetryPolicy, StreamCallback,
};
use crate::loader::LoaderError;
use crate::render::StateHandle;
use crate::tools::ToolServer;
use crate::tree::Tree;

pub const DEFAULT_MAX_FRAMES: u32 = 100;

/// Async human-gate prompt: `(message, body) -> approved`.
pub type HumanPromptFn =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, bool> + Send + Sync>;

/// Prompt/plan information surfaced before each agent dispatch.
#[derive(Debug, Clone)]
pub struct PlanPromptInfo {
    pub node_path: String,
    pub prompt: String,
    pub system: Option<String>,
    pub plan_xml: Option<String>,
}

/// Options for one `execute_plan` run.
#[derive(Clone)]
pub struct ExecuteOptions {
    /// Frame cap; the run fails with `MaxFramesReached` beyond it.
    pub max_frames: u32,
    /// Wall-clock bound, checked at the top of each frame.
    pub timeout: Option<Duration>,
    pub verbose: bool,
    /// Explicit `Some` overrides the `SMITHERS_MOCK_MODE` environment
    /// signal in both directions; `None` defers to it.
    pub mock_mode: Option<bool>,
    /// State store the workflow's components and callbacks share.
    pub state: StateHandle,
    pub controller: Option<ExecutionController>,
    pub debug: DebugOptions,

    pub on_plan: Option<Arc<dyn Fn(&str, u32) + Send + Sync>>,
    pub on_frame: Option<Arc<dyn Fn(&FrameResult) + Send + Sync>>,
    pub on_frame_update: Option<Arc<dyn Fn(&Tree, u32) + Send + Sync>>,
    pub on_plan_with_prompt: Option<Arc<dyn Fn(&PlanPromptInfo) + Send + Sync>>,
    pub on_human_prompt: Option<HumanPromptFn>,
    /// Fired when an `output` node publishes a named workflow value.
    pub on_value_set: Option<Arc<dyn Fn(&str, &serde_json::Value) + Send + Sync>>,
    pub on_stream: Option<StreamCallback>,

    /// Defaults applied to agent nodes that do not set their own.
    pub default_model: Option<String>,
    pub default_max_tokens: Option<u64>,

    /// Transport for `claude` nodes.
    pub backend: Arc<dyn AgentBackend>,
    /// Client for `claude-api` nodes; built from the environment when unset.
    pub api_client: Option<AnthropicClient>,
    pub retry: RetryPolicy,
    /// Tool servers available to nodes that declare them.
    pub tool_servers: Vec<Arc<dyn ToolServer>>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            timeout: None,
            verbose: false,
            mock_mode: None,
            state: StateHandle::new(),
            controller: None,
            debug: DebugOptions::default(),
            on_plan: None,
            on_frame: None,
            on_frame_update: None,
            on_plan_with_prompt: None,
            on_human_prompt: None,
            on_value_set: None,
            on_stream: None,
            default_model: None,
            default_max_tokens: None,
            backend: Arc::new(ClaudeCodeBackend),
            api_client: None,
            retry: RetryPolicy::default(),
            tool_servers: Vec::new(),
        }
    }
}

impl ExecuteOptions {
    /// Resolve the effective mock mode: explicit option first, environment
    /// second.
    pub fn resolve_mock(&self) -> bool {
        match self.mock_mode {
            Some(explicit) => explicit,
            None => crate::env::mock_mode_from_env(),
        }
    }
}

/// Reasons reported in `loop:terminated` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    NoPendingNodes,
    StopNode,
    Timeout,
    MaxFrames,
    HumanRejected,
    Aborted,
}

impl TerminationReason {
    pub fn label(&self) -> &'static str {
        match self {
            TerminationReason::NoPendingNodes => "no_pending_nodes",
            TerminationReason::StopNode => "stop_node",
            TerminationReason::Timeout => "timeout",
            TerminationReason::MaxFrames => "max_frames",
            TerminationReason::HumanRejected => "human_rejected",
            TerminationReason::Aborted => "aborted",
        }
    }
}

/// Fatal run errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),
    #[error("exceeded maximum frames ({0})")]
    MaxFramesReached(u32),
    #[error("human gate rejected at {0}")]
    HumanRejected(String),
    #[error("aborted: {0}")]
    Aborted(String),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("file node at {path} failed: {source}")]
    File {
        path: String,
        #[source]
        source: FileWriteError,
    },
    #[error("worktree node at {path} failed: {source}")]
    Worktree {
        path: String,
        #[source]
        source: WorktreeError,
    },
    #[error(transparent)]
    Loader(#[from] LoaderError),
}
