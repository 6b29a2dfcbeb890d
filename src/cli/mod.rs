//! # Command-line surface
//!
//! Argument parsing and configuration discovery for the `smithers` binary.
//! The engine itself knows nothing about flags; the binary maps them onto
//! `ExecuteOptions` and exit codes.

/// Clap argument definitions.
pub mod args;

/// Configuration discovery hierarchy and the TOML run config.
pub mod config;

pub use args::{Args, Commands};
pub use config::{ConfigDiscovery, RunConfig};
