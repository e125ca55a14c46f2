// Configuration module
// Author: kelexine (https://github.com/kelexine)

mod models;

pub use models::*;

use crate::error::Result;
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest, `PLATECACHE__CACHE__DISK_BYTE_LIMIT=...`)
    /// 2. Config file
    /// 3. Defaults (lowest)
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_config_path())
    }

    /// Same as [`AppConfig::load`] with an explicit config file path.
    /// A missing file is not an error; a malformed one is
    /// [`CacheError::ConfigParsing`](crate::error::CacheError::ConfigParsing).
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&Self::default())?)
            // Load from config file if it exists
            .add_source(File::from(path.to_path_buf()).required(false))
            // Override with environment variables
            .add_source(
                Environment::with_prefix("PLATECACHE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = config.try_deserialize()?;

        app.cache.limits()?;
        Ok(app)
    }

    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".platecache")
            .join("config.toml")
    }
}
