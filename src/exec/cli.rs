//! Subprocess executor (`claude-cli` nodes).
//!
//! Spawns the `claude` binary in headless mode with argv-level arguments
//! (never a shell), reads stdout to completion, and surfaces stderr when the
//! process exits nonzero.

use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::prompt::BuiltPrompt;
use super::types::{AgentError, AgentNodeConfig, AgentOutcome, AgentOutput, ExecuteContext};

const CLAUDE_BINARY: &str = "claude";

/// Execute a `claude-cli` node by spawning the CLI.
pub async fn execute_cli_node(
    config: &AgentNodeConfig,
    built: &BuiltPrompt,
    ctx: &ExecuteContext,
) -> Result<AgentOutcome, AgentError> {
    let binary = which::which(CLAUDE_BINARY).map_err(|_| {
        AgentError::Other(format!(
            "'{CLAUDE_BINARY}' binary not found on PATH; install Claude Code or use mock mode"
        ))
    })?;

    let mut command = Command::new(&binary);
    command.arg("--print").arg("--output-format").arg("text");
    if let Some(model) = &config.model {
        command.arg("--model").arg(model);
    }
    if let Some(max_turns) = config.max_turns {
        command.arg("--max-turns").arg(max_turns.to_string());
    }
    if !config.allowed_tools.is_empty() {
        command
            .arg("--allowedTools")
            .arg(config.allowed_tools.join(","));
    }
    if let Some(system) = &built.system {
        command.arg("--system-prompt").arg(system);
    }
    command.arg("--prompt").arg(built.user_message());

    if let Some(cwd) = ctx.cwd.as_ref().or(config.cwd.as_ref()) {
        command.current_dir(cwd);
    }
    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null());

    if ctx.verbose {
        // Reproduction line for the audit trail; the prompt is shell-escaped
        // so the logged command can be pasted back into a shell.
        debug!(
            "spawning: {} --print --output-format text --prompt {}",
            binary.display(),
            shell_escape::escape(built.user_message().into())
        );
    }

    let output = command
        .output()
        .await
        .map_err(|e| AgentError::Other(format!("failed to spawn {CLAUDE_BINARY}: {e}")))?;

    if !output.status.success() {
        return Err(AgentError::Subprocess {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let model = config
        .model
        .clone()
        .unwrap_or_else(|| "claude-cli-default".to_string());
    Ok(AgentOutcome {
        output: AgentOutput::Text(stdout.trim_end().to_string()),
        usage: None,
        model,
    })
}
