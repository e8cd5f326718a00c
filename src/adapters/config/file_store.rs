use crate::config::DEFAULT_CONFIG_FILE_NAME;
use crate::config::models::AppConfig;
use crate::core::error::ConfigError;
use crate::ports::ConfigurationStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub(crate) struct TomlFileConfigAdapter {
    base_path: PathBuf,
}

impl TomlFileConfigAdapter {
    pub(crate) fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn read_toml_file<T: DeserializeOwned>(&self, file_path: &Path) -> Result<T, ConfigError> {
        debug!("Reading TOML file: {:?}", file_path);
        let content = fs::read_to_string(file_path).map_err(|e| ConfigError::ReadFile {
            path: file_path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Deserialize {
            path: file_path.to_path_buf(),
            source: Box::new(e),
        })
    }

    fn write_toml_file<T: Serialize>(&self, data: &T, file_path: &Path) -> Result<(), ConfigError> {
        debug!("Writing TOML file: {:?}", file_path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let content =
            toml::to_string_pretty(data).map_err(|e| ConfigError::Serialize(Box::new(e)))?;
        fs::write(file_path, content).map_err(|e| ConfigError::WriteFile {
            path: file_path.to_path_buf(),
            source: e,
        })
    }
}

impl ConfigurationStore for TomlFileConfigAdapter {
    /// A missing file is replaced by a written default and reported as
    /// [`ConfigError::DefaultCreated`] so the operator can fill in the sources.
    fn load_app_config_file(&self, path: &Path) -> Result<AppConfig, ConfigError> {
        if !path.exists() {
            info!("Config file not found at {:?}. Writing defaults.", path);
            self.write_toml_file(&AppConfig::default(), path)?;
            return Err(ConfigError::DefaultCreated(path.to_path_buf()));
        }
        let config: AppConfig = self.read_toml_file(path)?;
        config.validate()?;
        Ok(config)
    }

    fn save_app_config_file(&self, config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
        self.write_toml_file(config, path)
    }

    fn get_default_config_path(&self) -> Result<PathBuf, ConfigError> {
        let path = self.base_path.join(DEFAULT_CONFIG_FILE_NAME);
        if !path.is_absolute() {
            if let Ok(abs_path) = std::env::current_dir().map(|p| p.join(&path)) {
                return Ok(abs_path);
            }
        }
        Ok(path)
    }
}
