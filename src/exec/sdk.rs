//! Agent-SDK executor (`claude` nodes).
//!
//! The transport is opaque: anything implementing [`AgentBackend`] can serve
//! `claude` nodes. The default backend drives the Claude Code CLI in
//! headless stream-json mode, which carries the full option surface
//! (allowed/disallowed tools, permission mode, MCP servers, structured
//! output, resume) without this crate owning an SDK dependency.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

use super::prompt::BuiltPrompt;
use super::types::{
    AgentError, AgentNodeConfig, AgentOutcome, AgentOutput, ExecuteContext, StreamEvent,
    ToolUseEvent,
};

/// Options forwarded to the backend for one query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentQueryOptions {
    pub model: Option<String>,
    pub system: Option<String>,
    pub max_turns: Option<u32>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub permission_mode: Option<String>,
    pub cwd: Option<PathBuf>,
    pub mcp_servers: Vec<String>,
    pub schema: Option<serde_json::Value>,
    pub resume: Option<String>,
    pub additional_directories: Vec<String>,
    pub setting_sources: Vec<String>,
    pub subagents: Option<serde_json::Value>,
    pub max_budget_usd: Option<f64>,
    pub max_thinking_tokens: Option<u64>,
}

/// Messages produced by a backend query, in arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    Result {
        subtype: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default)]
        errors: Vec<String>,
    },
}

/// The opaque agent transport: prompt and options in, message stream out.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn query(
        &self,
        prompt: &str,
        options: &AgentQueryOptions,
    ) -> Result<Vec<AgentMessage>, AgentError>;
}

/// Execute a `claude` node through the given backend.
pub async fn execute_sdk_node(
    backend: &Arc<dyn AgentBackend>,
    config: &AgentNodeConfig,
    built: &BuiltPrompt,
    ctx: &ExecuteContext,
) -> Result<AgentOutcome, AgentError> {
    let options = AgentQueryOptions {
        model: config.model.clone(),
        system: built.system.clone(),
        max_turns: config.max_turns,
        allowed_tools: config.allowed_tools.clone(),
        disallowed_tools: config.disallowed_tools.clone(),
        permission_mode: config.permission_mode.clone(),
        cwd: ctx.cwd.clone().or_else(|| config.cwd.clone()),
        mcp_servers: config.mcp_servers.clone(),
        schema: config.schema.clone(),
        resume: config.resume.clone(),
        additional_directories: config.additional_directories.clone(),
        setting_sources: config.setting_sources.clone(),
        subagents: config.subagents.clone(),
        max_budget_usd: config.max_budget_usd,
        max_thinking_tokens: config.max_thinking_tokens,
    };

    let messages = backend.query(&built.user_message(), &options).await?;

    let mut transcript = String::new();
    let mut final_result: Option<(String, Option<serde_json::Value>, Vec<String>)> = None;
    for message in messages {
        match message {
            AgentMessage::Text { text } => {
                if let Some(sink) = ctx.on_stream.as_ref() {
                    sink(StreamEvent::Text { text: text.clone() });
                }
                transcript.push_str(&text);
            }
            AgentMessage::ToolUse { id, name, input } => {
                if let Some(sink) = ctx.on_stream.as_ref() {
                    sink(StreamEvent::ToolUse {
                        tool_use: ToolUseEvent { id, name, input },
                    });
                }
            }
            AgentMessage::Result {
                subtype,
                result,
                errors,
            } => {
                final_result = Some((subtype, result, errors));
            }
        }
    }

    let model = config
        .model
        .clone()
        .unwrap_or_else(|| "claude-sdk-default".to_string());

    match final_result {
        Some((subtype, result, _)) if subtype == "success" => {
            let output = if config.schema.is_some() {
                let value = result.ok_or_else(|| {
                    AgentError::StructuredOutput(
                        "agent reported success but returned no structured value".to_string(),
                    )
                })?;
                AgentOutput::Structured(value)
            } else {
                match result {
                    Some(serde_json::Value::String(s)) => AgentOutput::Text(s),
                    Some(other) => AgentOutput::Text(other.to_string()),
                    None => AgentOutput::Text(transcript),
                }
            };
            Ok(AgentOutcome {
                output,
                usage: None,
                model,
            })
        }
        Some((subtype, _, errors)) => Err(AgentError::Other(format!(
            "agent stream ended with subtype '{subtype}': {}",
            if errors.is_empty() {
                "no error detail".to_string()
            } else {
                errors.join("; ")
            }
        ))),
        // No terminal result message: fall back to accumulated text.
        None => Ok(AgentOutcome {
            output: AgentOutput::Text(transcript),
            usage: None,
            model,
        }),
    }
}

/// Default backend: the Claude Code CLI in headless stream-json mode.
#[derive(Debug, Default)]
pub struct ClaudeCodeBackend;

#[async_trait]
impl AgentBackend for ClaudeCodeBackend {
    async fn query(
        &self,
        prompt: &str,
        options: &AgentQueryOptions,
    ) -> Result<Vec<AgentMessage>, AgentError> {
        let binary = which::which("claude").map_err(|_| {
            AgentError::Other(
                "'claude' binary not found on PATH; install Claude Code or use mock mode"
                    .to_string(),
            )
        })?;

        let mut command = Command::new(&binary);
        command
            .arg("--print")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose");
        if let Some(model) = &options.model {
            command.arg("--model").arg(model);
        }
        if let Some(max_turns) = options.max_turns {
            command.arg("--max-turns").arg(max_turns.to_string());
        }
        if !options.allowed_tools.is_empty() {
            command
                .arg("--allowedTools")
                .arg(options.allowed_tools.join(","));
        }
        if !options.disallowed_tools.is_empty() {
            command
                .arg("--disallowedTools")
                .arg(options.disallowed_tools.join(","));
        }
        if let Some(mode) = &options.permission_mode {
            command.arg("--permission-mode").arg(mode);
        }
        if let Some(system) = &options.system {
            command.arg("--append-system-prompt").arg(system);
        }
        if let Some(resume) = &options.resume {
            command.arg("--resume").arg(resume);
        }
        for dir in &options.additional_directories {
            command.arg("--add-dir").arg(dir);
        }
        command.arg("--").arg(prompt);

        if let Some(cwd) = &options.cwd {
            command.current_dir(cwd);
        }
        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null());

        debug!("claude backend query: {} bytes of prompt", prompt.len());
        let output = command
            .output()
            .await
            .map_err(|e| AgentError::Other(format!("failed to spawn claude: {e}")))?;

        if !output.status.success() {
            return Err(AgentError::Subprocess {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_stream_json(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse the CLI's stream-json (JSONL) output into backend messages.
fn parse_stream_json(stdout: &str) -> Vec<AgentMessage> {
    let mut messages = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(json) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        match json.get("type").and_then(|t| t.as_str()) {
            Some("assistant") => {
                let blocks = json
                    .pointer("/message/content")
                    .and_then(|c| c.as_array())
                    .cloned()
                    .unwrap_or_default();
                for block in blocks {
                    match block.get("type").and_then(|t| t.as_str()) {
                        Some("text") => {
                            if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                                messages.push(AgentMessage::Text {
                                    text: text.to_string(),
                                });
                            }
                        }
                        Some("tool_use") => {
                            messages.push(AgentMessage::ToolUse {
                                id: block
                                    .get("id")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or_default()
                                    .to_string(),
                                name: block
                                    .get("name")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or_default()
                                    .to_string(),
                                input: block.get("input").cloned().unwrap_or_default(),
                            });
                        }
                        _ => {}
                    }
                }
            }
            Some("result") => {
                let subtype = json
                    .get("subtype")
                    .and_then(|s| s.as_str())
                    .unwrap_or("success")
                    .to_string();
                let errors = json
                    .get("errors")
                    .and_then(|e| e.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                messages.push(AgentMessage::Result {
                    subtype,
                    result: json.get("result").cloned(),
                    errors,
                });
            }
            _ => {}
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedBackend {
        messages: Vec<AgentMessage>,
    }

    #[async_trait]
    impl AgentBackend for ScriptedBackend {
        async fn query(
            &self,
            _prompt: &str,
            _options: &AgentQueryOptions,
        ) -> Result<Vec<AgentMessage>, AgentError> {
            Ok(self.messages.clone())
        }
    }

    fn backend(messages: Vec<AgentMessage>) -> Arc<dyn AgentBackend> {
        Arc::new(ScriptedBackend { messages })
    }

    #[tokio::test]
    async fn success_result_wins_over_transcript() {
        let backend = backend(vec![
            AgentMessage::Text {
                text: "thinking...".to_string(),
            },
            AgentMessage::Result {
                subtype: "success".to_string(),
                result: Some(serde_json::json!("final answer")),
                errors: vec![],
            },
        ]);
        let outcome = execute_sdk_node(
            &backend,
            &AgentNodeConfig::default(),
            &BuiltPrompt::default(),
            &ExecuteContext::default(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.output, AgentOutput::Text("final answer".to_string()));
    }

    #[tokio::test]
    async fn non_success_subtype_fails_with_concatenated_errors() {
        let backend = backend(vec![AgentMessage::Result {
            subtype: "error_max_turns".to_string(),
            result: None,
            errors: vec!["ran out of turns".to_string(), "budget low".to_string()],
        }]);
        let err = execute_sdk_node(
            &backend,
            &AgentNodeConfig::default(),
            &BuiltPrompt::default(),
            &ExecuteContext::default(),
        )
        .await
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("error_max_turns"));
        assert!(message.contains("ran out of turns; budget low"));
    }

    #[tokio::test]
    async fn schema_requires_structured_result() {
        let config = AgentNodeConfig {
            schema: Some(serde_json::json!({"type": "object"})),
            ..Default::default()
        };
        let ok = backend(vec![AgentMessage::Result {
            subtype: "success".to_string(),
            result: Some(serde_json::json!({"answer": 42})),
            errors: vec![],
        }]);
        let outcome = execute_sdk_node(&ok, &config, &BuiltPrompt::default(), &ExecuteContext::default())
            .await
            .unwrap();
        assert_eq!(
            outcome.output,
            AgentOutput::Structured(serde_json::json!({"answer": 42}))
        );

        let missing = backend(vec![AgentMessage::Result {
            subtype: "success".to_string(),
            result: None,
            errors: vec![],
        }]);
        let err = execute_sdk_node(&missing, &config, &BuiltPrompt::default(), &ExecuteContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::StructuredOutput(_)));
    }

    #[tokio::test]
    async fn stream_events_are_delivered_in_order() {
        use std::sync::Mutex;
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let ctx = ExecuteContext {
            on_stream: Some(Arc::new(move |event| {
                let label = match event {
                    StreamEvent::Text { .. } => "text",
                    StreamEvent::ToolUse { .. } => "tool_use",
                };
                seen_clone.lock().unwrap().push(label.to_string());
            })),
            ..Default::default()
        };
        let backend = backend(vec![
            AgentMessage::Text {
                text: "a".to_string(),
            },
            AgentMessage::ToolUse {
                id: "tu_1".to_string(),
                name: "Read".to_string(),
                input: serde_json::json!({}),
            },
            AgentMessage::Text {
                text: "b".to_string(),
            },
        ]);
        execute_sdk_node(&backend, &AgentNodeConfig::default(), &BuiltPrompt::default(), &ctx)
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["text", "tool_use", "text"]);
    }

    #[test]
    fn stream_json_parses_assistant_and_result_lines() {
        let stdout = concat!(
            r#"{"type":"system","subtype":"init"}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hi"},{"type":"tool_use","id":"tu_1","name":"Read","input":{"path":"x"}}]}}"#,
            "\n",
            r#"{"type":"result","subtype":"success","result":"done"}"#,
            "\n",
        );
        let messages = parse_stream_json(stdout);
        assert_eq!(messages.len(), 3);
        assert!(matches!(&messages[0], AgentMessage::Text { text } if text == "hi"));
        assert!(matches!(&messages[1], AgentMessage::ToolUse { name, .. } if name == "Read"));
        assert!(
            matches!(&messages[2], AgentMessage::Result { subtype, result, .. }
                if subtype == "success" && result == &Some(serde_json::json!("done")))
        );
    }
}
