//! Configuration data structures for platecache.
//!
//! This module defines the schema for the application settings: cache
//! limits, the HTTP transport and logging.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::cache::CacheConfig;
use serde::{Deserialize, Serialize};

/// The root configuration object for the application.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Memory and disk tier bounds.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Image transport settings.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Logging and observability settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the HTTP image transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Whole-request timeout in seconds.
    /// Default: `30`
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Connection establishment timeout in seconds.
    /// Default: `10`
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Idle connections kept per host.
    /// Default: `10`
    #[serde(default = "default_pool_size")]
    pub pool_max_idle_per_host: usize,

    /// Value of the `User-Agent` header.
    /// Default: `platecache/<version>`
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Largest response body accepted.
    /// Default: `20971520` (20 MB)
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
}

/// Settings for application logging and output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    /// Default: `info`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for logs (`pretty`, `json`, `compact`).
    /// Default: `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            pool_max_idle_per_host: default_pool_size(),
            user_agent: default_user_agent(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_pool_size() -> usize {
    10
}

fn default_user_agent() -> String {
    format!("platecache/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_image_bytes() -> u64 {
    20 * 1024 * 1024 // 20MB
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
