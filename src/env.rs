//! Environment variables and path constants.
//!
//! Centralizes the environment surface and the configuration discovery
//! paths so they are defined in exactly one place.

use std::path::PathBuf;

/// API key consumed by the direct messages-API executor.
pub const ANTHROPIC_API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Alternate way to enable mock mode; an explicit option always wins.
pub const SMITHERS_MOCK_MODE_VAR: &str = "SMITHERS_MOCK_MODE";

/// Standard no-color signal; CI sets this to keep log output assertable.
pub const NO_COLOR_VAR: &str = "NO_COLOR";

/// Application directory name (hidden directory like .git).
pub const SMITHERS_DIR_NAME: &str = ".smithers";

/// Configuration file names.
pub const LOCAL_CONFIG_FILE_NAME: &str = "smithers.toml";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Whether the environment requests mock mode.
pub fn mock_mode_from_env() -> bool {
    matches!(
        std::env::var(SMITHERS_MOCK_MODE_VAR).as_deref(),
        Ok("true") | Ok("1")
    )
}

/// Whether colored output is disabled.
pub fn no_color() -> bool {
    std::env::var_os(NO_COLOR_VAR).is_some_and(|v| !v.is_empty())
}

/// `./smithers.toml`
pub fn local_config_file_path(current_dir: &std::path::Path) -> PathBuf {
    current_dir.join(LOCAL_CONFIG_FILE_NAME)
}

/// `./.smithers/config.toml`
pub fn local_dir_config_file_path(current_dir: &std::path::Path) -> PathBuf {
    current_dir.join(SMITHERS_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// `~/.smithers/config.toml`
pub fn user_config_file_path(home_dir: &std::path::Path) -> PathBuf {
    home_dir.join(SMITHERS_DIR_NAME).join(CONFIG_FILE_NAME)
}
