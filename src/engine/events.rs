//! Structured debug event stream.
//!
//! Every observable engine action emits a [`DebugEvent`] tagged with a
//! monotonic timestamp and the frame number. The collector filters by kind,
//! optionally captures tree snapshots, buffers events for post-run
//! inspection, and forwards each event to an optional sink callback.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Every event kind the scheduler emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugEventKind {
    FrameStart,
    FrameRender,
    FrameEnd,
    NodeFound,
    NodeExecuteStart,
    NodeExecuteEnd,
    CallbackInvoked,
    StateChange,
    ControlStop,
    ControlHuman,
    ControlPause,
    ControlResume,
    ControlSkip,
    ControlAbort,
    LoopTerminated,
}

impl DebugEventKind {
    /// Wire label, e.g. `node:execute:start`.
    pub fn label(&self) -> &'static str {
        match self {
            DebugEventKind::FrameStart => "frame:start",
            DebugEventKind::FrameRender => "frame:render",
            DebugEventKind::FrameEnd => "frame:end",
            DebugEventKind::NodeFound => "node:found",
            DebugEventKind::NodeExecuteStart => "node:execute:start",
            DebugEventKind::NodeExecuteEnd => "node:execute:end",
            DebugEventKind::CallbackInvoked => "callback:invoked",
            DebugEventKind::StateChange => "state:change",
            DebugEventKind::ControlStop => "control:stop",
            DebugEventKind::ControlHuman => "control:human",
            DebugEventKind::ControlPause => "control:pause",
            DebugEventKind::ControlResume => "control:resume",
            DebugEventKind::ControlSkip => "control:skip",
            DebugEventKind::ControlAbort => "control:abort",
            DebugEventKind::LoopTerminated => "loop:terminated",
        }
    }
}

impl Serialize for DebugEventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// One emitted event.
#[derive(Debug, Clone, Serialize)]
pub struct DebugEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "frameNumber")]
    pub frame: u32,
    #[serde(rename = "type")]
    pub kind: DebugEventKind,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree_snapshot: Option<String>,
}

pub type EventSink = Arc<dyn Fn(&DebugEvent) + Send + Sync>;

/// Collector configuration, set through `ExecuteOptions::debug`.
#[derive(Clone, Default)]
pub struct DebugOptions {
    pub enabled: bool,
    /// When set, only these kinds are collected.
    pub events: Option<HashSet<DebugEventKind>>,
    /// Attach the serialized tree to `frame:render` events.
    pub capture_tree: bool,
    pub sink: Option<EventSink>,
}

impl DebugOptions {
    pub fn all() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }
}

/// Buffering collector shared by the scheduler and callback wrappers.
pub struct DebugCollector {
    options: DebugOptions,
    events: Mutex<Vec<DebugEvent>>,
}

impl DebugCollector {
    pub fn new(options: DebugOptions) -> Self {
        Self {
            options,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn capture_tree(&self) -> bool {
        self.options.enabled && self.options.capture_tree
    }

    pub fn emit(&self, frame: u32, kind: DebugEventKind, data: serde_json::Value) {
        self.emit_with_snapshot(frame, kind, data, None);
    }

    pub fn emit_with_snapshot(
        &self,
        frame: u32,
        kind: DebugEventKind,
        data: serde_json::Value,
        tree_snapshot: Option<String>,
    ) {
        if !self.options.enabled {
            return;
        }
        if let Some(filter) = &self.options.events
            && !filter.contains(&kind)
        {
            return;
        }
        let event = DebugEvent {
            timestamp: Utc::now(),
            frame,
            kind,
            data,
            tree_snapshot,
        };
        if let Some(sink) = &self.options.sink {
            sink(&event);
        }
        self.events.lock().expect("event buffer poisoned").push(event);
    }

    /// Drain the buffered events.
    pub fn take_events(&self) -> Vec<DebugEvent> {
        std::mem::take(&mut *self.events.lock().expect("event buffer poisoned"))
    }

    /// Buffered events of one kind, in emission order.
    pub fn events_of(&self, kind: DebugEventKind) -> Vec<DebugEvent> {
        self.events
            .lock()
            .expect("event buffer poisoned")
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}
