//! External execution control.
//!
//! An [`ExecutionController`] is a cloneable handle the caller keeps while
//! `execute_plan` runs. The scheduler consults it at two checkpoints per
//! frame: the top of frame (pause/abort) and immediately before each node
//! dispatch (skip/inject). The `/command` layer lets external UIs drive the
//! controller without reaching into scheduler internals.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::tree::{resolve_path, ExecutionStatus, NodeId, NodeKind, Tree};

/// Snapshot surfaced to `/status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControllerStatus {
    pub frame: u32,
    pub elapsed_ms: u64,
    pub paused: bool,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub running_nodes: Vec<String>,
    pub pending_nodes: Vec<String>,
}

#[derive(Default)]
struct ControllerInner {
    paused: AtomicBool,
    aborted: AtomicBool,
    abort_reason: Mutex<Option<String>>,
    /// Queued skip intents; `None` targets the next pending node.
    skips: Mutex<VecDeque<Option<String>>>,
    /// Queued prompt injections for the next pending claude node.
    injections: Mutex<VecDeque<String>>,
    status: Mutex<ControllerStatus>,
    tree: Mutex<Option<Tree>>,
}

/// Cloneable control handle shared between the caller and the scheduler.
#[derive(Clone, Default)]
pub struct ExecutionController {
    inner: Arc<ControllerInner>,
}

impl ExecutionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
    }

    pub fn abort(&self, reason: impl Into<String>) {
        *self.inner.abort_reason.lock().expect("abort lock poisoned") = Some(reason.into());
        self.inner.aborted.store(true, Ordering::SeqCst);
    }

    /// Queue a skip; `None` skips the next pending node.
    pub fn skip(&self, path: Option<String>) {
        self.inner
            .skips
            .lock()
            .expect("skip lock poisoned")
            .push_back(path);
    }

    /// Queue a prompt injection for the next pending claude node.
    pub fn inject(&self, text: impl Into<String>) {
        self.inner
            .injections
            .lock()
            .expect("inject lock poisoned")
            .push_back(text.into());
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    pub fn abort_reason(&self) -> Option<String> {
        self.inner
            .abort_reason
            .lock()
            .expect("abort lock poisoned")
            .clone()
    }

    pub fn next_skip(&self) -> Option<Option<String>> {
        self.inner
            .skips
            .lock()
            .expect("skip lock poisoned")
            .pop_front()
    }

    /// Peek without consuming; the scheduler consumes only when the skip
    /// applies to the node at hand.
    pub fn peek_skip(&self) -> Option<Option<String>> {
        self.inner
            .skips
            .lock()
            .expect("skip lock poisoned")
            .front()
            .cloned()
    }

    pub fn next_injection(&self) -> Option<String> {
        self.inner
            .injections
            .lock()
            .expect("inject lock poisoned")
            .pop_front()
    }

    pub fn get_status(&self) -> ControllerStatus {
        self.inner.status.lock().expect("status lock poisoned").clone()
    }

    pub(crate) fn set_status(&self, status: ControllerStatus) {
        *self.inner.status.lock().expect("status lock poisoned") = status;
    }

    pub(crate) fn set_tree(&self, tree: Tree) {
        *self.inner.tree.lock().expect("tree lock poisoned") = Some(tree);
    }

    fn with_tree<T>(&self, f: impl FnOnce(&Tree) -> T) -> Option<T> {
        self.inner
            .tree
            .lock()
            .expect("tree lock poisoned")
            .as_ref()
            .map(f)
    }
}

/// Parsed `/command` input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandInput {
    Pause,
    Resume,
    Status,
    Tree,
    Focus(String),
    Skip(Option<String>),
    Inject(String),
    Abort(Option<String>),
    Help,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command '{0}'; try /help")]
    Unknown(String),
    #[error("/{0} requires an argument")]
    MissingArgument(&'static str),
    #[error("not a command: expected a leading '/'")]
    NotACommand,
}

/// Result of handling one command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub message: String,
}

/// Parse a raw `/command` line.
pub fn parse_command(raw: &str) -> Result<CommandInput, CommandError> {
    let raw = raw.trim();
    let Some(stripped) = raw.strip_prefix('/') else {
        return Err(CommandError::NotACommand);
    };
    let (name, rest) = match stripped.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (stripped, ""),
    };
    match name {
        "pause" => Ok(CommandInput::Pause),
        "resume" => Ok(CommandInput::Resume),
        "status" => Ok(CommandInput::Status),
        "tree" => Ok(CommandInput::Tree),
        "focus" => {
            if rest.is_empty() {
                Err(CommandError::MissingArgument("focus"))
            } else {
                Ok(CommandInput::Focus(rest.to_string()))
            }
        }
        "skip" => Ok(CommandInput::Skip(
            (!rest.is_empty()).then(|| rest.to_string()),
        )),
        "inject" => {
            if rest.is_empty() {
                Err(CommandError::MissingArgument("inject"))
            } else {
                Ok(CommandInput::Inject(rest.to_string()))
            }
        }
        "abort" => Ok(CommandInput::Abort(
            (!rest.is_empty()).then(|| rest.to_string()),
        )),
        "help" => Ok(CommandInput::Help),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

const HELP_TEXT: &str = "\
/pause            pause before the next node dispatch
/resume           resume a paused run
/status           current frame, counts, and elapsed time
/tree             render the current node tree
/focus <path>     render one subtree
/skip [path]      mark the next (or named) pending node complete
/inject <text>    prepend text to the next pending claude node's prompt
/abort [reason]   terminate the run at the next checkpoint
/help             this text";

/// Apply a parsed command to a controller.
pub fn handle_command(controller: &ExecutionController, command: CommandInput) -> CommandResult {
    let message = match command {
        CommandInput::Pause => {
            controller.pause();
            "paused; next node dispatch will wait".to_string()
        }
        CommandInput::Resume => {
            controller.resume();
            "resumed".to_string()
        }
        CommandInput::Status => {
            let status = controller.get_status();
            format!(
                "frame {} | elapsed {}ms | {} | pending {} | running {} | completed {}",
                status.frame,
                status.elapsed_ms,
                if status.paused { "paused" } else { "running" },
                status.pending,
                status.running,
                status.completed,
            )
        }
        CommandInput::Tree => controller
            .with_tree(format_tree)
            .unwrap_or_else(|| "no tree rendered yet".to_string()),
        CommandInput::Focus(path) => controller
            .with_tree(|tree| match resolve_path(tree, tree.root(), &path) {
                Some(node) => format_subtree(tree, node, 0),
                None => format!("no node at path {path}"),
            })
            .unwrap_or_else(|| "no tree rendered yet".to_string()),
        CommandInput::Skip(path) => {
            let target = path
                .clone()
                .unwrap_or_else(|| "next pending node".to_string());
            controller.skip(path);
            format!("will skip {target}")
        }
        CommandInput::Inject(text) => {
            controller.inject(text);
            "will inject into the next pending claude node".to_string()
        }
        CommandInput::Abort(reason) => {
            let reason = reason.unwrap_or_else(|| "user abort".to_string());
            controller.abort(reason.clone());
            format!("aborting: {reason}")
        }
        CommandInput::Help => HELP_TEXT.to_string(),
    };
    CommandResult { message }
}

/// Render the tree with per-node status markers for `/tree`.
pub fn format_tree(tree: &Tree) -> String {
    format_subtree(tree, tree.root(), 0)
}

fn format_subtree(tree: &Tree, node: NodeId, depth: usize) -> String {
    let record = tree.get(node);
    let mut line = format!("{}{}", "  ".repeat(depth), record.kind.tag());
    if record.kind == NodeKind::Text {
        let value = record.text_value().unwrap_or_default();
        let preview: String = value.chars().take(40).collect();
        line = format!("{line} {preview:?}");
    }
    if let Some(execution) = &record.execution {
        let marker = match execution.status {
            ExecutionStatus::Pending => "○",
            ExecutionStatus::Running => "◐",
            ExecutionStatus::Complete => "●",
            ExecutionStatus::Error => "✗",
        };
        line = format!("{line} {marker}");
    }
    let mut out = line;
    for &child in &record.children {
        out.push('\n');
        out.push_str(&format_subtree(tree, child, depth + 1));
    }
    out
}
