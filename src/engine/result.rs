//! Run results.

use serde::Serialize;
use std::time::Duration;

use crate::provider::UsageSummary;

/// Per-frame record kept in the run history.
#[derive(Debug, Clone, Serialize)]
pub struct FrameResult {
    pub frame: u32,
    /// Serialized plan rendered at the top of the frame.
    pub plan: String,
    /// Labels of the nodes executed this frame, in dispatch order.
    pub executed_nodes: Vec<String>,
    /// Applied state updates attributable to this frame.
    pub state_changes: u64,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

/// Final result of `execute_plan`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// The last recorded output: the most recent agent result, or whatever
    /// the final `onFinished` callback observed.
    pub output: Option<serde_json::Value>,
    pub frames: u32,
    #[serde(with = "duration_millis")]
    pub total_duration: Duration,
    pub history: Vec<FrameResult>,
    /// Tool servers connected during the run.
    pub mcp_servers: Vec<String>,
    /// Aggregated provider usage.
    pub usage: UsageSummary,
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }
}
