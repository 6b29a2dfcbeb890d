//! Mock executor and prompt-embedded JSON extraction.
//!
//! Mock mode makes workflows testable without credentials: agent nodes
//! resolve immediately, and a prompt that embeds a JSON object returns that
//! object verbatim so structured flows exercise their full path. Extraction
//! is brace matching with string/escape awareness, validated strictly by the
//! JSON parser; a non-greedy regex would stop at the first `}` inside a
//! nested object.

use super::prompt::BuiltPrompt;
use super::types::{AgentNodeConfig, AgentOutcome, AgentOutput, TokenUsage};

/// Execute any agent node in mock mode.
pub fn execute_mock_node(config: &AgentNodeConfig, built: &BuiltPrompt) -> AgentOutcome {
    let prompt = built.user_message();
    let output = match extract_json_object(&prompt) {
        Some(json_text) => {
            if config.schema.is_some() {
                AgentOutput::Structured(
                    serde_json::from_str(json_text).unwrap_or(serde_json::Value::Null),
                )
            } else {
                AgentOutput::Text(json_text.to_string())
            }
        }
        None => AgentOutput::Text(mock_text(&prompt)),
    };
    AgentOutcome {
        output,
        usage: Some(TokenUsage {
            input_tokens: (prompt.len() as u64).div_ceil(4),
            output_tokens: 16,
        }),
        model: config
            .model
            .clone()
            .unwrap_or_else(|| "mock".to_string()),
    }
}

fn mock_text(prompt: &str) -> String {
    let summary: String = prompt.split_whitespace().take(12).collect::<Vec<_>>().join(" ");
    format!("Mock response to: {summary}")
}

/// Extract the first complete JSON object embedded in `text`, if any.
///
/// Walks the text tracking brace depth, string state, and escapes; every
/// balanced candidate is validated with the real JSON parser before being
/// accepted, so `{not json}` is skipped and a later valid object still wins.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut search_from = 0usize;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = None;

        for (i, &b) in bytes[start..].iter().enumerate() {
            if escaped {
                escaped = false;
                continue;
            }
            match b {
                b'\\' if in_string => escaped = true,
                b'"' => in_string = !in_string,
                b'{' if !in_string => depth += 1,
                b'}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(start + i + 1);
                        break;
                    }
                }
                _ => {}
            }
        }

        match end {
            Some(end) => {
                let candidate = &text[start..end];
                if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                    return Some(candidate);
                }
                search_from = start + 1;
            }
            None => {
                // Unbalanced from this opening brace; try the next one.
                search_from = start + 1;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_nested_object_completely() {
        let prompt = r#"Return exactly: {"outer": {"inner": true}, "n": 1} thanks"#;
        assert_eq!(
            extract_json_object(prompt),
            Some(r#"{"outer": {"inner": true}, "n": 1}"#)
        );
    }

    #[test]
    fn braces_inside_strings_do_not_terminate() {
        let prompt = r#"{"text": "a } inside", "ok": true}"#;
        assert_eq!(extract_json_object(prompt), Some(prompt));
    }

    #[test]
    fn escaped_quotes_are_handled() {
        let prompt = r#"{"text": "she said \"}\" loudly"}"#;
        assert_eq!(extract_json_object(prompt), Some(prompt));
    }

    #[test]
    fn invalid_candidates_are_skipped_for_later_valid_ones() {
        let prompt = r#"set {not json} then {"ok": true}"#;
        assert_eq!(extract_json_object(prompt), Some(r#"{"ok": true}"#));
    }

    #[test]
    fn no_object_returns_none() {
        assert_eq!(extract_json_object("no braces here"), None);
        assert_eq!(extract_json_object("unbalanced { forever"), None);
    }

    #[test]
    fn mock_returns_embedded_json_as_text() {
        let built = BuiltPrompt {
            prompt: r#"Return exactly: {"ok": true}"#.to_string(),
            ..Default::default()
        };
        let outcome = execute_mock_node(&AgentNodeConfig::default(), &built);
        assert_eq!(outcome.output, AgentOutput::Text(r#"{"ok": true}"#.to_string()));
        let parsed: serde_json::Value =
            serde_json::from_str(&outcome.output.as_text()).unwrap();
        assert_eq!(parsed, serde_json::json!({"ok": true}));
    }

    #[test]
    fn mock_returns_structured_when_schema_set() {
        let config = AgentNodeConfig {
            schema: Some(serde_json::json!({"type": "object"})),
            ..Default::default()
        };
        let built = BuiltPrompt {
            prompt: r#"Produce {"count": 3}"#.to_string(),
            ..Default::default()
        };
        let outcome = execute_mock_node(&config, &built);
        assert_eq!(
            outcome.output,
            AgentOutput::Structured(serde_json::json!({"count": 3}))
        );
    }

    #[test]
    fn mock_without_json_synthesizes_text() {
        let built = BuiltPrompt {
            prompt: "Say hello.".to_string(),
            ..Default::default()
        };
        let outcome = execute_mock_node(&AgentNodeConfig::default(), &built);
        assert!(outcome.output.as_text().starts_with("Mock response to:"));
    }
}
