//! # Builder for CacheConfig
//!
//! ```
//! use webcache_engine::{CacheConfig, FreshnessMode};
//!
//! let config = CacheConfig::builder()
//!     .with_directory("/tmp/webcache")
//!     .with_max_size(10 * 1024 * 1024)
//!     .with_freshness(FreshnessMode::Periodic)
//!     .with_freshness_period_hours(1.5)
//!     .build();
//! assert_eq!(config.max_size, 10 * 1024 * 1024);
//! ```

use std::path::PathBuf;

use crate::config::{CacheConfig, FreshnessMode};

/// Builder for creating CacheConfig instances with a fluent API
#[derive(Debug, Clone, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.config.directory = directory.into();
        self
    }

    /// Set the primary store budget in bytes
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.config.max_size = max_size;
        self
    }

    pub fn with_checkpoint_on_exit(mut self, enabled: bool) -> Self {
        self.config.checkpoint_on_exit = enabled;
        self
    }

    pub fn with_freshness(mut self, mode: FreshnessMode) -> Self {
        self.config.freshness = mode;
        self
    }

    /// Period for `periodic` freshness, in hours
    pub fn with_freshness_period_hours(mut self, hours: f64) -> Self {
        self.config.freshness_period_hours = hours;
        self
    }

    pub fn build(self) -> CacheConfig {
        self.config
    }
}
