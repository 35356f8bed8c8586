use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use webcache_engine::CacheConfig;

use crate::error::{AppError, Result};

const APP_NAME: &str = "webcache";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// User agent string for requests
    pub user_agent: String,

    /// Request timeout in seconds, 0 disables it
    pub timeout: u64,

    pub cache: CacheConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("{APP_NAME}/{}", env!("CARGO_PKG_VERSION")),
            timeout: 30,
            cache: CacheConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `config_path`, or from the default location.
    /// A missing file yields the defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_config_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&content)?;
        config.cache.validate()?;
        Ok(config)
    }

    /// Get default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.show()?)?;
        Ok(())
    }

    /// Reset configuration to defaults and save
    pub fn reset(config_path: Option<&Path>) -> Result<PathBuf> {
        let path = config_path
            .map(Path::to_path_buf)
            .or_else(Self::default_config_path)
            .ok_or_else(|| AppError::Config("No configuration path available".to_string()))?;

        Self::default().save(&path)?;
        Ok(path)
    }

    /// Show current configuration as a formatted string
    pub fn show(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
