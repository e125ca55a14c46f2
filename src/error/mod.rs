// Error types for platecache
// Author: kelexine (https://github.com/kelexine)

use thiserror::Error;

/// Every failure the cache can report.
///
/// Variants carry rendered messages instead of source errors so the type is
/// `Clone`: one fetch outcome is handed to every coalesced waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("HTTP status {status} for {locator}")]
    FetchStatus { locator: String, status: u16 },

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Config parsing error: {0}")]
    ConfigParsing(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Network-level failures (transport or non-2xx status).
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, CacheError::Fetch(_) | CacheError::FetchStatus { .. })
    }

    /// Failures after which the requesting view should show its placeholder.
    /// Everything except configuration problems, which abort startup instead.
    pub fn shows_placeholder(&self) -> bool {
        !matches!(self, CacheError::Configuration(_) | CacheError::ConfigParsing(_))
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Json(err.to_string())
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        CacheError::Fetch(err.to_string())
    }
}

impl From<config::ConfigError> for CacheError {
    fn from(err: config::ConfigError) -> Self {
        CacheError::ConfigParsing(err.to_string())
    }
}

impl From<image::ImageError> for CacheError {
    fn from(err: image::ImageError) -> Self {
        CacheError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
