//! Configuration discovery and loading.
//!
//! Discovery hierarchy:
//! 1. Current directory: `./smithers.toml` or `./.smithers/config.toml`
//! 2. User config: `~/.smithers/config.toml`
//! 3. Built-in defaults
//!
//! CLI flags override whatever the file provides.

use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::engine::DEFAULT_MAX_FRAMES;
use crate::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub max_frames: u32,
    pub timeout_ms: Option<u64>,
    pub model: Option<String>,
    pub max_tokens: Option<u64>,
    pub mock: bool,
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            timeout_ms: None,
            model: None,
            max_tokens: None,
            mock: false,
            verbose: false,
        }
    }
}

impl RunConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn to_toml_file(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Configuration discovery system.
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Discover and load configuration using the hierarchy.
    pub fn discover_config() -> Result<RunConfig, Box<dyn std::error::Error>> {
        if let Some(path) = Self::find_config_file() {
            info!("loading configuration from {:?}", path);
            return RunConfig::from_toml_file(&path);
        }
        debug!("no configuration file found, using defaults");
        Ok(RunConfig::default())
    }

    /// First existing candidate in priority order.
    pub fn find_config_file() -> Option<PathBuf> {
        for candidate in Self::config_candidates() {
            debug!("checking for config file {:?}", candidate);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    fn config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Ok(current) = std_env::current_dir() {
            candidates.push(env::local_config_file_path(&current));
            candidates.push(env::local_dir_config_file_path(&current));
        }
        if let Some(home) = Self::home_dir() {
            candidates.push(env::user_config_file_path(&home));
        }
        candidates
    }

    fn home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_sensible() {
        let config = RunConfig::default();
        assert_eq!(config.max_frames, DEFAULT_MAX_FRAMES);
        assert!(!config.mock);
        assert!(config.timeout_ms.is_none());
    }

    #[test]
    fn toml_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let config = RunConfig {
            max_frames: 25,
            timeout_ms: Some(60_000),
            model: Some("claude-sonnet-4-5-20250929".to_string()),
            max_tokens: Some(4096),
            mock: true,
            verbose: false,
        };
        config.to_toml_file(&path).unwrap();
        let loaded = RunConfig::from_toml_file(&path).unwrap();
        assert_eq!(loaded.max_frames, 25);
        assert_eq!(loaded.timeout_ms, Some(60_000));
        assert_eq!(loaded.model.as_deref(), Some("claude-sonnet-4-5-20250929"));
        assert!(loaded.mock);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: RunConfig = toml::from_str("max_frames = 7").unwrap();
        assert_eq!(config.max_frames, 7);
        assert!(config.model.is_none());
        assert!(!config.mock);
    }
}
