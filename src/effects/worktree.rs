//! Git worktree lifecycle.
//!
//! A worktree node creates (or verifies) a git worktree before any of its
//! descendant agents run; descendants inherit the worktree path as their
//! working directory. Branch names are validated before anything is spawned,
//! and git is always invoked at the argv level, never through a shell.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::{debug, info};

use crate::tree::{NodeId, Props, Tree};

#[derive(Debug, Clone)]
pub struct WorktreeConfig {
    pub path: PathBuf,
    pub branch: String,
    pub base_branch: Option<String>,
    pub mock: bool,
}

impl WorktreeConfig {
    pub fn from_props(props: &Props) -> Result<Self, WorktreeError> {
        let path = props
            .str_prop("path")
            .map(PathBuf::from)
            .ok_or(WorktreeError::MissingProp("path"))?;
        let branch = props
            .str_prop("branch")
            .map(str::to_string)
            .ok_or(WorktreeError::MissingProp("branch"))?;
        Ok(Self {
            path,
            branch,
            base_branch: props.str_prop("baseBranch").map(str::to_string),
            mock: props.bool_prop("_mockMode").unwrap_or(false),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("worktree node is missing the required '{0}' prop")]
    MissingProp(&'static str),
    #[error("invalid git branch name '{name}': {reason}")]
    InvalidBranch { name: String, reason: String },
    #[error("worktree at {path} is on branch '{actual}', expected '{expected}'")]
    BranchMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("git {subcommand} failed with exit code {code}: {stderr}")]
    Git {
        subcommand: String,
        code: i32,
        stderr: String,
    },
    #[error("failed to spawn git: {0}")]
    Spawn(String),
}

fn branch_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_./-]+$").expect("valid regex"))
}

/// Validate a branch name against the allowed character set and the git
/// ref-name hazards (leading dash, `..`, `@{`, `~`).
pub fn validate_branch_name(name: &str) -> Result<(), WorktreeError> {
    let reject = |reason: &str| {
        Err(WorktreeError::InvalidBranch {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };
    if name.is_empty() {
        return reject("empty name");
    }
    if !branch_pattern().is_match(name) {
        return reject("allowed characters are A-Z a-z 0-9 _ . / -");
    }
    if name.starts_with('-') {
        return reject("leading '-' would be parsed as a flag");
    }
    if name.contains("..") {
        return reject("'..' is not allowed in ref names");
    }
    if name.contains("@{") {
        return reject("'@{' is not allowed in ref names");
    }
    if name.contains('~') {
        return reject("'~' is not allowed in ref names");
    }
    Ok(())
}

/// Create the worktree described by a worktree node, or verify an existing
/// one. Returns the absolute worktree path, recorded as the node's result
/// and inherited as cwd by descendant agents.
pub async fn create_worktree_node(
    tree: &Tree,
    node: NodeId,
    global_mock: bool,
) -> Result<PathBuf, WorktreeError> {
    let config = WorktreeConfig::from_props(&tree.get(node).props)?;
    create_worktree(&config, global_mock).await
}

pub async fn create_worktree(
    config: &WorktreeConfig,
    global_mock: bool,
) -> Result<PathBuf, WorktreeError> {
    validate_branch_name(&config.branch)?;
    if let Some(base) = &config.base_branch {
        validate_branch_name(base)?;
    }

    let absolute = std::path::absolute(&config.path)
        .unwrap_or_else(|_| config.path.clone());

    if config.mock || global_mock {
        debug!(
            "mock worktree: {} on branch {}",
            absolute.display(),
            config.branch
        );
        return Ok(absolute);
    }

    if absolute.exists() {
        // A worktree is already there; fail loudly unless it is on the
        // branch this node expects.
        let actual = current_branch(&absolute).await?;
        if actual != config.branch {
            return Err(WorktreeError::BranchMismatch {
                path: absolute.display().to_string(),
                expected: config.branch.clone(),
                actual,
            });
        }
        debug!(
            "worktree at {} already on '{}', reusing",
            absolute.display(),
            config.branch
        );
        return Ok(absolute);
    }

    let mut args: Vec<String> = vec![
        "worktree".to_string(),
        "add".to_string(),
        "-b".to_string(),
        config.branch.clone(),
        "--".to_string(),
        absolute.display().to_string(),
    ];
    if let Some(base) = &config.base_branch {
        args.push(base.clone());
    }
    run_git(&args, None).await?;
    info!(
        "created worktree {} on branch {}",
        absolute.display(),
        config.branch
    );
    Ok(absolute)
}

async fn current_branch(worktree_path: &Path) -> Result<String, WorktreeError> {
    let output = run_git(
        &[
            "rev-parse".to_string(),
            "--abbrev-ref".to_string(),
            "HEAD".to_string(),
        ],
        Some(worktree_path),
    )
    .await?;
    Ok(output.trim().to_string())
}

async fn run_git(args: &[String], cwd: Option<&Path>) -> Result<String, WorktreeError> {
    let mut command = Command::new("git");
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null());

    let output = command
        .output()
        .await
        .map_err(|e| WorktreeError::Spawn(e.to_string()))?;

    if !output.status.success() {
        return Err(WorktreeError::Git {
            subcommand: args.first().cloned().unwrap_or_default(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
