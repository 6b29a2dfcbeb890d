//! Command line argument parsing.
//!
//! Subcommands:
//! - `run`: load a workflow file and execute it to its fixed point
//! - `plan`: load, render once, and print the serialized plan (no execution)
//! - `init`: scaffold a starter workflow file from a template

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "smithers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compose and execute multi-agent LLM workflows as declarative component trees")]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to the workflow file
        file: PathBuf,
        /// Approve all human gates without prompting
        #[arg(short = 'y', long = "yes")]
        yes: bool,
        /// Render and print the plan without executing
        #[arg(short = 'n', long = "dry-run")]
        dry_run: bool,
        /// Enable verbose output
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
        /// Drive the run through an attached TUI front-end
        #[arg(long = "tui")]
        tui: bool,
        /// Execute in mock mode (no credentials or subprocesses)
        #[arg(long = "mock")]
        mock: bool,
        /// Maximum render/execute frames
        #[arg(long = "max-frames", value_name = "N")]
        max_frames: Option<u32>,
        /// Wall-clock timeout in milliseconds
        #[arg(long = "timeout", value_name = "MS")]
        timeout: Option<u64>,
        /// Model override for agent nodes that do not set one
        #[arg(long = "model")]
        model: Option<String>,
        /// Max tokens override for api-mode agent nodes
        #[arg(long = "max-tokens", value_name = "N")]
        max_tokens: Option<u64>,
        /// Emit the final result as JSON
        #[arg(long = "json")]
        json: bool,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Render a workflow file and print its plan without executing
    Plan {
        /// Path to the workflow file
        file: PathBuf,
        /// Emit the plan as JSON instead of XML
        #[arg(long = "json")]
        json: bool,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Scaffold a starter workflow file
    Init {
        /// Template name (`hello` or `review`)
        #[arg(default_value = "hello")]
        template: String,
        /// Output path (defaults to ./<template>.json)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }
}
