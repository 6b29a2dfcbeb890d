//! Tool preparation for a single agent node.
//!
//! Merges tools imported from the node's declared servers with the node's
//! inline tools. Inline wins name collisions: all remote tools with the
//! colliding name are removed (iterating backward so removals do not skew
//! indices when several servers expose the same name) before the inline
//! definition is appended.

use std::sync::Arc;
use tracing::warn;

use super::render_node::{render_node_tool, PlanNodeRunner};
use super::server::ToolServerManager;
use super::types::{ToolDef, ToolError, ToolOrigin};

/// Prepare the merged tool list for one agent node.
///
/// - `inline`: tools declared on the node's `tools` prop.
/// - `server_names`: servers declared on the node's `mcpServers` prop; only
///   these are imported, so tools never leak from servers other nodes use.
/// - `plan_runner`: present iff the node carries plan children; injects the
///   `render_node` tool.
pub async fn prepare_tools(
    inline: &[ToolDef],
    server_names: &[String],
    manager: &Arc<ToolServerManager>,
    plan_runner: Option<Arc<dyn PlanNodeRunner>>,
) -> Result<Vec<ToolDef>, ToolError> {
    for name in server_names {
        manager.connect(name).await?;
    }
    let mut tools = manager.import_tools(server_names).await?;

    for tool in inline {
        let mut normalized = tool.clone();
        normalize_schema(&mut normalized);

        let colliding: Vec<usize> = tools
            .iter()
            .enumerate()
            .filter(|(_, t)| t.name == normalized.name)
            .map(|(i, _)| i)
            .collect();
        if !colliding.is_empty() {
            warn!(
                "inline tool '{}' overrides {} remote tool(s) with the same name",
                normalized.name,
                colliding.len()
            );
            for idx in colliding.into_iter().rev() {
                tools.remove(idx);
            }
        }
        tools.push(normalized);
    }

    if let Some(runner) = plan_runner {
        tools.push(render_node_tool(runner));
    }

    Ok(tools)
}

/// Convert the deprecated `parameters` shape to a proper input schema, once.
fn normalize_schema(tool: &mut ToolDef) {
    if tool.input_schema.is_some() {
        return;
    }
    let Some(parameters) = tool.parameters.take() else {
        return;
    };
    warn!(
        "tool '{}': the 'parameters' shape is deprecated, use 'input_schema'",
        tool.name
    );
    let required: Vec<String> = parameters
        .as_object()
        .map(|props| {
            props
                .iter()
                .filter(|(_, v)| {
                    v.get("required")
                        .and_then(|r| r.as_bool())
                        .unwrap_or(false)
                })
                .map(|(k, _)| k.clone())
                .collect()
        })
        .unwrap_or_default();
    tool.input_schema = Some(serde_json::json!({
        "type": "object",
        "properties": parameters,
        "required": required,
    }));
}

/// Validate that every inline tool headed to the api-mode executor carries an
/// input schema.
pub fn require_schemas(tools: &[ToolDef]) -> Result<(), ToolError> {
    for tool in tools {
        if tool.origin == ToolOrigin::Inline && tool.input_schema.is_none() {
            return Err(ToolError::MissingSchema(tool.name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::server::test_support::EchoServer;

    #[tokio::test]
    async fn inline_wins_collisions_across_servers() {
        let manager = Arc::new(ToolServerManager::new());
        manager
            .register(Arc::new(EchoServer::new("a", &["search", "fetch"])))
            .await;
        manager
            .register(Arc::new(EchoServer::new("b", &["search"])))
            .await;

        let inline = vec![ToolDef::new(
            "search",
            "local search",
            serde_json::json!({"type": "object", "properties": {}}),
        )];
        let tools = prepare_tools(
            &inline,
            &["a".to_string(), "b".to_string()],
            &manager,
            None,
        )
        .await
        .unwrap();

        let search: Vec<&ToolDef> = tools.iter().filter(|t| t.name == "search").collect();
        assert_eq!(search.len(), 1, "both remote 'search' tools removed");
        assert_eq!(search[0].origin, ToolOrigin::Inline);
        assert!(tools.iter().any(|t| t.name == "fetch"));
    }

    #[tokio::test]
    async fn imports_are_scoped_to_declared_servers() {
        let manager = Arc::new(ToolServerManager::new());
        manager
            .register(Arc::new(EchoServer::new("a", &["alpha"])))
            .await;
        manager
            .register(Arc::new(EchoServer::new("b", &["beta"])))
            .await;

        // A previous node already connected server "b".
        manager.connect("b").await.unwrap();

        let tools = prepare_tools(&[], &["a".to_string()], &manager, None)
            .await
            .unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha"], "no leakage from server 'b'");
    }

    #[tokio::test]
    async fn legacy_parameters_convert_to_schema() {
        let manager = Arc::new(ToolServerManager::new());
        let inline = vec![ToolDef::with_legacy_parameters(
            "lookup",
            "legacy tool",
            serde_json::json!({
                "id": {"type": "string", "required": true},
                "verbose": {"type": "boolean"},
            }),
        )];
        let tools = prepare_tools(&inline, &[], &manager, None).await.unwrap();
        let schema = tools[0].input_schema.as_ref().unwrap();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], serde_json::json!(["id"]));
        assert!(schema["properties"]["verbose"].is_object());
    }

    #[test]
    fn require_schemas_flags_missing_inline_schema() {
        let tool = ToolDef {
            name: "broken".into(),
            description: String::new(),
            input_schema: None,
            parameters: None,
            executor: None,
            origin: ToolOrigin::Inline,
        };
        assert!(matches!(
            require_schemas(&[tool]),
            Err(ToolError::MissingSchema(_))
        ));
    }
}
