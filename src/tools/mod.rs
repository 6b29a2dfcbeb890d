//! # Tool preparation layer
//!
//! Agent nodes see a single merged tool list assembled per node from three
//! sources: tools imported from the node's declared tool servers, the node's
//! inline tool definitions, and engine builtins (`render_node` when a plan is
//! present). Collisions resolve to the inline definition with a warning.
//!
//! The transport behind a tool server is opaque: the engine only speaks the
//! [`ToolServer`] trait, and the [`ToolServerManager`] owns the connection
//! lifecycle for the run.

/// Tool definitions, responses, and errors.
pub mod types;

/// The opaque server trait and the run-scoped connection manager.
pub mod server;

/// Per-node merge of inline, remote, and builtin tools.
pub mod prepare;

/// The injected `render_node` plan tool.
pub mod render_node;

pub use prepare::{prepare_tools, require_schemas};
pub use render_node::{render_node_tool, PlanNodeRunner, RenderNodeOutcome};
pub use server::{ToolServer, ToolServerManager};
pub use types::{
    RemoteToolSpec, ToolContent, ToolDef, ToolError, ToolExecutorFn, ToolOrigin, ToolResponse,
};
