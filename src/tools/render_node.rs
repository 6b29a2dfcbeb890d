//! The `render_node` tool: lets a plan-aware agent execute specific plan
//! nodes by path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::types::{ToolDef, ToolError, ToolOrigin};

/// Outcome of executing one plan node on the agent's behalf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderNodeOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub node_type: String,
    pub node_path: String,
}

/// Engine-side hook that resolves a path inside the current plan and
/// executes that subtree.
#[async_trait]
pub trait PlanNodeRunner: Send + Sync {
    async fn execute_path(&self, node_path: &str) -> RenderNodeOutcome;
}

/// Build the injected `render_node` tool backed by the given runner.
pub fn render_node_tool(runner: Arc<dyn PlanNodeRunner>) -> ToolDef {
    let mut def = ToolDef::new(
        "render_node",
        "Execute a node from the plan by its path attribute and return its result.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "node_path": {
                    "type": "string",
                    "description": "The path attribute of the plan node to execute",
                }
            },
            "required": ["node_path"],
        }),
    );
    def.origin = ToolOrigin::Builtin;
    def.executor = Some(Arc::new(move |args| {
        let runner = Arc::clone(&runner);
        Box::pin(async move {
            let node_path = args
                .get("node_path")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::ExecutionFailed {
                    tool: "render_node".to_string(),
                    message: "missing required argument 'node_path'".to_string(),
                })?
                .to_string();
            let outcome = runner.execute_path(&node_path).await;
            serde_json::to_value(&outcome).map_err(|e| ToolError::ExecutionFailed {
                tool: "render_node".to_string(),
                message: e.to_string(),
            })
        })
    }));
    def
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRunner;

    #[async_trait]
    impl PlanNodeRunner for FixedRunner {
        async fn execute_path(&self, node_path: &str) -> RenderNodeOutcome {
            if node_path == "ROOT/task[0]" {
                RenderNodeOutcome {
                    success: true,
                    result: Some(serde_json::json!("done")),
                    error: None,
                    node_type: "task".to_string(),
                    node_path: node_path.to_string(),
                }
            } else {
                RenderNodeOutcome {
                    success: false,
                    result: None,
                    error: Some(format!("no node at path {node_path}")),
                    node_type: String::new(),
                    node_path: node_path.to_string(),
                }
            }
        }
    }

    #[tokio::test]
    async fn executes_resolvable_path() {
        let tool = render_node_tool(Arc::new(FixedRunner));
        let executor = tool.executor.clone().unwrap();
        let out = executor(serde_json::json!({"node_path": "ROOT/task[0]"}))
            .await
            .unwrap();
        assert_eq!(out["success"], true);
        assert_eq!(out["result"], "done");
        assert_eq!(out["node_type"], "task");
    }

    #[tokio::test]
    async fn missing_argument_is_a_tool_error() {
        let tool = render_node_tool(Arc::new(FixedRunner));
        let executor = tool.executor.clone().unwrap();
        assert!(executor(serde_json::json!({})).await.is_err());
    }

    #[tokio::test]
    async fn unresolvable_path_reports_failure_outcome() {
        let tool = render_node_tool(Arc::new(FixedRunner));
        let executor = tool.executor.clone().unwrap();
        let out = executor(serde_json::json!({"node_path": "ROOT/task[9]"}))
            .await
            .unwrap();
        assert_eq!(out["success"], false);
        assert!(out["error"].as_str().unwrap().contains("no node"));
    }
}
