pub(crate) mod models;

use crate::core::error::ConfigError;
use std::path::{Path, PathBuf};

pub(crate) const DEFAULT_CONFIG_FILE_NAME: &str = "iiko_updater.toml";

/// Current directory first, then the per-user config directory.
/// When neither exists the current-directory path is returned so a default can be written there.
pub(crate) fn find_config_file() -> Result<PathBuf, ConfigError> {
    let current_dir_path = Path::new(".").join(DEFAULT_CONFIG_FILE_NAME);
    if current_dir_path.exists() {
        return Ok(current_dir_path);
    }

    if let Some(user_config_dir) = dirs::config_dir() {
        let user_config_path = user_config_dir
            .join("iiko-updater")
            .join(DEFAULT_CONFIG_FILE_NAME);
        if user_config_path.exists() {
            return Ok(user_config_path);
        }
    }
    Ok(current_dir_path)
}
