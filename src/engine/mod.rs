//! # The Ralph loop engine
//!
//! `execute_plan` drives a workflow element to its fixed point: render the
//! tree, restore hash-gated execution state, run files before agents and
//! worktrees before their descendants, gate on stop and human nodes,
//! dispatch pending agents sequentially or in parallel, flush callback state
//! changes, and re-render until a frame leaves nothing to do.
//!
//! ## Pieces
//!
//! - **[`scheduler`]**: the per-frame state machine.
//! - **[`store`]**: path-keyed execution records and the approval set.
//! - **[`events`]**: the structured debug event stream.
//! - **[`controller`]**: external pause/resume/skip/inject/abort plus the
//!   `/command` layer for UIs.
//! - **[`options`]** / **[`result`]**: run configuration and outputs.

/// The per-frame scheduler.
pub mod scheduler;

/// Execution store and approval set.
pub mod store;

/// Debug event stream.
pub mod events;

/// External execution controller and command parsing.
pub mod controller;

/// Run options and the engine error taxonomy.
pub mod options;

/// Run results.
pub mod result;

pub use controller::{
    format_tree, handle_command, parse_command, CommandError, CommandInput, CommandResult,
    ControllerStatus, ExecutionController,
};
pub use events::{DebugCollector, DebugEvent, DebugEventKind, DebugOptions};
pub use options::{
    EngineError, ExecuteOptions, HumanPromptFn, PlanPromptInfo, TerminationReason,
    DEFAULT_MAX_FRAMES,
};
pub use result::{ExecutionResult, FrameResult};
pub use scheduler::execute_plan;
pub use store::{ApprovalSet, ExecutionStore};
