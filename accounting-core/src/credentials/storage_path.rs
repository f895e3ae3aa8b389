//! Default location of the encrypted token file.

use std::path::{Path, PathBuf};

/// Product folder under the platform config directory.
pub const APP_DIR_NAME: &str = "accounting-mcp";

/// Token file name.
pub const TOKEN_FILE_NAME: &str = "tokens.enc";

/// Per-OS default token file path.
///
/// - macOS: `~/Library/Application Support/accounting-mcp/tokens.enc`
/// - Windows: `%APPDATA%\accounting-mcp\tokens.enc`
/// - Linux: `$XDG_CONFIG_HOME/accounting-mcp/tokens.enc` or `~/.config/accounting-mcp/tokens.enc`
#[must_use]
pub fn default_storage_path() -> PathBuf {
    resolve_default_path(dirs::config_dir(), dirs::home_dir())
}

fn resolve_default_path(config_dir: Option<PathBuf>, home_dir: Option<PathBuf>) -> PathBuf {
    match (config_dir, home_dir) {
        (Some(config), _) => config.join(APP_DIR_NAME).join(TOKEN_FILE_NAME),
        (None, Some(home)) => home
            .join(format!(".{APP_DIR_NAME}"))
            .join(TOKEN_FILE_NAME),
        (None, None) => Path::new(TOKEN_FILE_NAME).to_path_buf(),
    }
}
