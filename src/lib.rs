//! # Smithers
//!
//! A framework for composing multi-agent LLM workflows as declarative
//! component trees. Authors build trees of semantic components (agent
//! nodes, structural phases, control-flow nodes, side-effect nodes); the
//! engine renders the tree to a canonical node graph, serializes it to an
//! XML plan, and drives a render → execute → re-render fixed-point loop
//! until the workflow terminates.
//!
//! ## Architecture Overview
//!
//! - **[`tree`]**: the node arena, host operations, stable node paths,
//!   content hashing, and the XML plan serializer
//! - **[`render`]**: declarative elements, component closures, the state
//!   store, and reconciliation into the retained tree
//! - **[`engine`]**: the fixed-point scheduler, execution store, debug
//!   event stream, and the external execution controller
//! - **[`exec`]**: the three agent executor variants (SDK, messages API,
//!   CLI subprocess) plus mock mode, prompt construction, and retries
//! - **[`tools`]**: inline/remote tool preparation and the opaque
//!   tool-server seam
//! - **[`effects`]**: file writes, git worktree lifecycle, human gates
//! - **[`provider`]**: per-subtree rate limits, budgets, and usage
//! - **[`loader`]**: the agent-file loader seam with a JSON plan loader
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use smithers::engine::{execute_plan, ExecuteOptions};
//! use smithers::render::dsl;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let workflow = dsl::claude()
//!         .prop("model", "claude-sonnet-4-5-20250929")
//!         .text("Summarize the repository layout.")
//!         .build();
//!
//!     let result = execute_plan(workflow, ExecuteOptions::default()).await?;
//!     println!("{:?}", result.output);
//!     Ok(())
//! }
//! ```

/// Node arena, host ops, paths, hashing, and XML serialization.
pub mod tree;

/// Declarative elements, components, state store, and reconciliation.
pub mod render;

/// The fixed-point scheduler and its control surfaces.
pub mod engine;

/// Agent executors and prompt construction.
pub mod exec;

/// Tool preparation and the tool-server seam.
pub mod tools;

/// Side-effect executors: file, worktree, human.
pub mod effects;

/// Rate and budget providers.
pub mod provider;

/// Agent-file loading.
pub mod loader;

/// Command-line surface.
pub mod cli;

/// Environment variables and path constants.
pub mod env;

// Re-export the main entry points.
pub use engine::{
    execute_plan, ExecuteOptions, ExecutionController, ExecutionResult, FrameResult,
};
pub use render::{dsl, Element, StateHandle};
pub use tree::{Node, NodeId, NodeKind, Tree};
