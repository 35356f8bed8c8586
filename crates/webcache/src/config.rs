//! # Cache Configuration
//!
//! Settings for the disk cache, loadable from and savable to TOML.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

const DEFAULT_DIRECTORY: &str = "cache";
const DEFAULT_MAX_SIZE: u64 = 5000 * 1024;
const DEFAULT_PERIOD_HOURS: f64 = 4.0;
const APP_DIR: &str = "webcache";

/// When a cached document may be served without asking the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FreshnessMode {
    /// Cached copies are always fresh
    Never,
    /// Cached copies are always revalidated
    Always,
    /// Fresh the first time a key is queried in this process, stale afterwards
    #[default]
    PerSession,
    /// Fresh until the configured period has passed since the last validation
    Periodic,
}

impl fmt::Display for FreshnessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FreshnessMode::Never => "never",
            FreshnessMode::Always => "always",
            FreshnessMode::PerSession => "per-session",
            FreshnessMode::Periodic => "periodic",
        };
        f.write_str(name)
    }
}

impl FromStr for FreshnessMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '_'], "-").as_str() {
            "never" => Ok(FreshnessMode::Never),
            "always" => Ok(FreshnessMode::Always),
            "per-session" => Ok(FreshnessMode::PerSession),
            "periodic" => Ok(FreshnessMode::Periodic),
            other => Err(CacheError::Config(format!(
                "Unknown freshness mode '{other}', expected never, always, per-session or periodic"
            ))),
        }
    }
}

/// Disk cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Store directory. Relative paths resolve against the user data directory.
    pub directory: PathBuf,

    /// Budget for the primary store, in bytes
    pub max_size: u64,

    /// Checkpoint every store's log on shutdown
    pub checkpoint_on_exit: bool,

    pub freshness: FreshnessMode,

    /// Only used in `periodic` mode
    pub freshness_period_hours: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_DIRECTORY),
            max_size: DEFAULT_MAX_SIZE,
            checkpoint_on_exit: true,
            freshness: FreshnessMode::default(),
            freshness_period_hours: DEFAULT_PERIOD_HOURS,
        }
    }
}

impl CacheConfig {
    pub fn builder() -> crate::builder::CacheConfigBuilder {
        crate::builder::CacheConfigBuilder::new()
    }

    /// Read a TOML config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> CacheResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            CacheError::Config(format!("Failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> CacheResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CacheError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> CacheResult<()> {
        if !self.freshness_period_hours.is_finite() || self.freshness_period_hours < 0.0 {
            return Err(CacheError::Config(format!(
                "freshness_period_hours must be a non-negative number, got {}",
                self.freshness_period_hours
            )));
        }
        Ok(())
    }

    /// Periods too long for a [`Duration`] saturate to [`Duration::MAX`].
    pub fn freshness_period(&self) -> Duration {
        Duration::try_from_secs_f64(self.freshness_period_hours.max(0.0) * 3600.0)
            .unwrap_or(Duration::MAX)
    }

    /// Store directory with `~` expanded and relative paths anchored at the
    /// user data directory.
    pub fn resolved_directory(&self) -> PathBuf {
        let base = dirs::data_dir().map(|dir| dir.join(APP_DIR));
        resolve_directory(&self.directory, base.as_deref(), dirs::home_dir().as_deref())
    }
}

fn resolve_directory(dir: &Path, base: Option<&Path>, home: Option<&Path>) -> PathBuf {
    if let Ok(rest) = dir.strip_prefix("~") {
        if let Some(home) = home {
            return home.join(rest);
        }
    }
    if dir.is_absolute() {
        return dir.to_path_buf();
    }
    match base {
        Some(base) => base.join(dir),
        None => dir.to_path_buf(),
    }
}
