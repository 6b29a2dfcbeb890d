//! Direct messages-API executor (`claude-api` nodes).
//!
//! Speaks the Anthropic messages endpoint over HTTP and owns the tool loop:
//! send, collect text and tool_use blocks, execute requested tools, feed the
//! results back, repeat up to the iteration cap. Supports SSE streaming with
//! per-block event delivery and structured output via a JSON-schema
//! instruction.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::tools::{require_schemas, ToolDef};

use super::prompt::BuiltPrompt;
use super::retry::{with_rate_limit_retry, RetryPolicy};
use super::types::{
    AgentError, AgentNodeConfig, AgentOutcome, AgentOutput, ExecuteContext, StreamCallback,
    StreamEvent, TokenUsage, ToolUseEvent,
};

pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const DEFAULT_MAX_TOKENS: u64 = 8192;

/// Thin client over the messages endpoint.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn from_env() -> Result<Self, AgentError> {
        let api_key =
            std::env::var(crate::env::ANTHROPIC_API_KEY_VAR).map_err(|_| AgentError::MissingApiKey)?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn send(
        &self,
        request: &MessagesRequest,
        on_stream: Option<&StreamCallback>,
    ) -> Result<ApiTurn, AgentError> {
        debug!("messages request: model={} stream={}", request.model, request.stream);
        let response = self
            .http
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            let message = extract_api_error(&body);
            return Err(match status.as_u16() {
                429 => AgentError::RateLimit {
                    message,
                    retry_after,
                },
                529 => AgentError::RateLimit {
                    message: format!("overloaded: {message}"),
                    retry_after,
                },
                code => AgentError::Api {
                    status: code,
                    message,
                },
            });
        }

        if request.stream {
            parse_sse_response(response, on_stream).await
        } else {
            let parsed: MessagesResponse = response
                .json()
                .await
                .map_err(|e| AgentError::Network(e.to_string()))?;
            if let Some(sink) = on_stream {
                for block in &parsed.content {
                    emit_block(sink, block);
                }
            }
            Ok(ApiTurn {
                content: parsed.content,
                stop_reason: parsed.stop_reason,
                usage: parsed.usage.map(|u| TokenUsage {
                    input_tokens: u.input_tokens,
                    output_tokens: u.output_tokens,
                }),
            })
        }
    }
}

/// Run the tool loop for a `claude-api` node.
pub async fn execute_api_node(
    client: &AnthropicClient,
    config: &AgentNodeConfig,
    built: &BuiltPrompt,
    tools: &[ToolDef],
    ctx: &ExecuteContext,
    retry: &RetryPolicy,
) -> Result<AgentOutcome, AgentError> {
    require_schemas(tools)?;

    let model = config
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let mut system = built.system.clone();
    if let Some(schema) = &config.schema {
        let instruction = format!(
            "Respond with a single JSON object conforming to this JSON Schema:\n{schema}"
        );
        system = Some(match system {
            Some(s) => format!("{s}\n\n{instruction}"),
            None => instruction,
        });
    }

    let api_tools: Option<Vec<serde_json::Value>> = if tools.is_empty() {
        None
    } else {
        Some(tools.iter().map(ToolDef::api_json).collect())
    };

    let mut messages = vec![ApiMessage {
        role: "user".to_string(),
        content: serde_json::Value::String(built.user_message()),
    }];
    let mut transcript = String::new();
    let mut usage_total = TokenUsage::default();
    let on_stream = if config.stream { ctx.on_stream.as_ref() } else { None };

    for iteration in 0..config.max_tool_iterations {
        let request = MessagesRequest {
            model: model.clone(),
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: messages.clone(),
            system: system.clone(),
            tools: api_tools.clone(),
            stream: config.stream,
        };
        let turn =
            with_rate_limit_retry(retry, |_| client.send(&request, on_stream)).await?;

        if let Some(usage) = turn.usage {
            usage_total.input_tokens += usage.input_tokens;
            usage_total.output_tokens += usage.output_tokens;
        }

        let mut tool_uses: Vec<(String, String, serde_json::Value)> = Vec::new();
        for block in &turn.content {
            match block {
                ContentBlock::Text { text } => transcript.push_str(text),
                ContentBlock::ToolUse { id, name, input } => {
                    tool_uses.push((id.clone(), name.clone(), input.clone()));
                }
                ContentBlock::Unknown => {}
            }
        }

        let ended = turn.stop_reason.as_deref() == Some("end_turn") || tool_uses.is_empty();
        if ended {
            return finish(transcript, config, usage_total, model);
        }

        let mut tool_results: Vec<serde_json::Value> = Vec::new();
        for (id, name, input) in &tool_uses {
            let (content, is_error) = run_tool(tools, name, input.clone()).await;
            tool_results.push(serde_json::json!({
                "type": "tool_result",
                "tool_use_id": id,
                "content": content,
                "is_error": is_error,
            }));
        }

        let assistant_content: Vec<serde_json::Value> = turn
            .content
            .iter()
            .filter(|b| !matches!(b, ContentBlock::Unknown))
            .map(|b| serde_json::to_value(b).unwrap_or_default())
            .collect();
        messages.push(ApiMessage {
            role: "assistant".to_string(),
            content: serde_json::Value::Array(assistant_content),
        });
        messages.push(ApiMessage {
            role: "user".to_string(),
            content: serde_json::Value::Array(tool_results),
        });
        debug!("tool loop iteration {} complete", iteration + 1);
    }

    warn!(
        "tool loop hit the iteration cap ({}); returning accumulated text",
        config.max_tool_iterations
    );
    finish(transcript, config, usage_total, model)
}

async fn run_tool(
    tools: &[ToolDef],
    name: &str,
    input: serde_json::Value,
) -> (String, bool) {
    let Some(tool) = tools.iter().find(|t| t.name == name) else {
        return (format!("tool '{name}' is not available"), true);
    };
    let Some(executor) = &tool.executor else {
        return (format!("tool '{name}' has no executor"), true);
    };
    match executor(input).await {
        Ok(serde_json::Value::String(s)) => (s, false),
        Ok(other) => (other.to_string(), false),
        Err(err) => (err.to_string(), true),
    }
}

fn finish(
    transcript: String,
    config: &AgentNodeConfig,
    usage: TokenUsage,
    model: String,
) -> Result<AgentOutcome, AgentError> {
    let output = if config.schema.is_some() {
        let extracted = super::mock::extract_json_object(&transcript).ok_or_else(|| {
            AgentError::StructuredOutput(format!(
                "no JSON object found in response: {}",
                preview(&transcript)
            ))
        })?;
        let value: serde_json::Value = serde_json::from_str(extracted)
            .map_err(|e| AgentError::StructuredOutput(e.to_string()))?;
        AgentOutput::Structured(value)
    } else {
        AgentOutput::Text(transcript)
    };
    Ok(AgentOutcome {
        output,
        usage: Some(usage),
        model,
    })
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}

fn extract_api_error(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

fn emit_block(sink: &StreamCallback, block: &ContentBlock) {
    match block {
        ContentBlock::Text { text } => sink(StreamEvent::Text { text: text.clone() }),
        ContentBlock::ToolUse { id, name, input } => sink(StreamEvent::ToolUse {
            tool_use: ToolUseEvent {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            },
        }),
        ContentBlock::Unknown => {}
    }
}

#[derive(Debug, Clone, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u64,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct ApiMessage {
    role: String,
    content: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Block types this executor does not consume (e.g. thinking).
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// One completed API turn, from either transport.
struct ApiTurn {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<TokenUsage>,
}

/// Accumulate an SSE stream into completed content blocks, emitting stream
/// events as each block finishes.
async fn parse_sse_response(
    response: reqwest::Response,
    on_stream: Option<&StreamCallback>,
) -> Result<ApiTurn, AgentError> {
    let mut bytes_stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut blocks: Vec<ContentBlock> = Vec::new();
    let mut current: Option<PartialBlock> = None;
    let mut stop_reason: Option<String> = None;
    let mut usage = TokenUsage::default();

    while let Some(chunk) = bytes_stream.next().await {
        let chunk = chunk.map_err(|e| AgentError::Network(e.to_string()))?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(event_end) = buffer.find("\n\n") {
            let event_str = buffer[..event_end].to_string();
            buffer.drain(..event_end + 2);

            let mut event_type = String::new();
            let mut event_data = String::new();
            for line in event_str.lines() {
                if let Some(rest) = line.strip_prefix("event: ") {
                    event_type = rest.to_string();
                } else if let Some(rest) = line.strip_prefix("data: ") {
                    event_data = rest.to_string();
                }
            }
            if event_data.is_empty() {
                continue;
            }
            let data: serde_json::Value = match serde_json::from_str(&event_data) {
                Ok(v) => v,
                Err(_) => continue,
            };

            match event_type.as_str() {
                "message_start" => {
                    if let Some(n) = data
                        .pointer("/message/usage/input_tokens")
                        .and_then(|v| v.as_u64())
                    {
                        usage.input_tokens = n;
                    }
                }
                "content_block_start" => {
                    current = Some(PartialBlock::start(&data));
                }
                "content_block_delta" => {
                    if let Some(block) = current.as_mut() {
                        block.apply_delta(&data);
                    }
                }
                "content_block_stop" => {
                    if let Some(block) = current.take()
                        && let Some(done) = block.finish()
                    {
                        if let Some(sink) = on_stream {
                            emit_block(sink, &done);
                        }
                        blocks.push(done);
                    }
                }
                "message_delta" => {
                    if let Some(reason) = data
                        .pointer("/delta/stop_reason")
                        .and_then(|v| v.as_str())
                    {
                        stop_reason = Some(reason.to_string());
                    }
                    if let Some(n) = data
                        .pointer("/usage/output_tokens")
                        .and_then(|v| v.as_u64())
                    {
                        usage.output_tokens = n;
                    }
                }
                "message_stop" => {}
                "error" => {
                    let message = data
                        .pointer("/error/message")
                        .and_then(|v| v.as_str())
                        .unwrap_or("stream error")
                        .to_string();
                    return Err(AgentError::Network(message));
                }
                _ => {}
            }
        }
    }

    Ok(ApiTurn {
        content: blocks,
        stop_reason,
        usage: Some(usage),
    })
}

/// A content block being accumulated from deltas.
enum PartialBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        partial_json: String,
    },
    Unknown,
}

impl PartialBlock {
    fn start(data: &serde_json::Value) -> Self {
        match data
            .pointer("/content_block/type")
            .and_then(|v| v.as_str())
        {
            Some("text") => PartialBlock::Text {
                text: data
                    .pointer("/content_block/text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            },
            Some("tool_use") => PartialBlock::ToolUse {
                id: data
                    .pointer("/content_block/id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                name: data
                    .pointer("/content_block/name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                partial_json: String::new(),
            },
            _ => PartialBlock::Unknown,
        }
    }

    fn apply_delta(&mut self, data: &serde_json::Value) {
        match self {
            PartialBlock::Text { text } => {
                if let Some(t) = data.pointer("/delta/text").and_then(|v| v.as_str()) {
                    text.push_str(t);
                }
            }
            PartialBlock::ToolUse { partial_json, .. } => {
                if let Some(j) = data
                    .pointer("/delta/partial_json")
                    .and_then(|v| v.as_str())
                {
                    partial_json.push_str(j);
                }
            }
            PartialBlock::Unknown => {}
        }
    }

    fn finish(self) -> Option<ContentBlock> {
        match self {
            PartialBlock::Text { text } => Some(ContentBlock::Text { text }),
            PartialBlock::ToolUse {
                id,
                name,
                partial_json,
            } => {
                let input = if partial_json.is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&partial_json).unwrap_or(serde_json::json!({}))
                };
                Some(ContentBlock::ToolUse { id, name, input })
            }
            PartialBlock::Unknown => None,
        }
    }
}
