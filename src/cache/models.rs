//! Cache configuration, limits, handles and statistics.

// Author: kelexine (https://github.com/kelexine)

use crate::error::{CacheError, Result};
use crate::imaging::DownsampleTarget;
use futures::future::{BoxFuture, Shared};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

const MB: u64 = 1024 * 1024;

/// Configuration for the two-tier image cache, as read from the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Upper bound on the decoded bytes held in memory.
    /// Default: `104857600` (100 MB)
    #[serde(default = "default_memory_byte_limit")]
    pub memory_byte_limit: u64,

    /// Upper bound on the number of decoded images held in memory.
    /// Default: `50`
    #[serde(default = "default_memory_count_limit")]
    pub memory_count_limit: usize,

    /// Upper bound on the bytes stored on disk.
    /// Default: `314572800` (300 MB)
    #[serde(default = "default_disk_byte_limit")]
    pub disk_byte_limit: u64,

    /// Age after which a disk entry is no longer served.
    /// Default: `604800` (7 days)
    #[serde(default = "default_expiration_seconds")]
    pub expiration_seconds: u64,

    /// Directory holding the disk tier.
    /// Default: `<platform cache dir>/platecache`
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Downsample box applied on the fetch path when a request names none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_downsample: Option<DownsampleTarget>,

    /// Period of the background expiration sweep; `0` disables it.
    /// Default: `3600` (1 hour)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_byte_limit: default_memory_byte_limit(),
            memory_count_limit: default_memory_count_limit(),
            disk_byte_limit: default_disk_byte_limit(),
            expiration_seconds: default_expiration_seconds(),
            cache_dir: default_cache_dir(),
            default_downsample: None,
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl CacheConfig {
    /// Validated limits derived from this configuration.
    pub fn limits(&self) -> Result<CacheLimits> {
        CacheLimits::new(
            self.memory_byte_limit,
            self.memory_count_limit,
            self.disk_byte_limit,
            Duration::from_secs(self.expiration_seconds),
        )
    }

    /// Background sweep period, or `None` when the sweep is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_seconds > 0).then(|| Duration::from_secs(self.sweep_interval_seconds))
    }
}

fn default_memory_byte_limit() -> u64 {
    100 * MB
}

fn default_memory_count_limit() -> usize {
    50
}

fn default_disk_byte_limit() -> u64 {
    300 * MB
}

fn default_expiration_seconds() -> u64 {
    7 * 24 * 60 * 60
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("platecache")
}

fn default_sweep_interval() -> u64 {
    3600
}

/// Capacity and expiration bounds for both tiers.
///
/// Construct through [`CacheLimits::new`] so every bound is known positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub memory_byte_limit: u64,
    pub memory_count_limit: usize,
    pub disk_byte_limit: u64,
    pub expiration: Duration,
}

impl CacheLimits {
    pub fn new(
        memory_byte_limit: u64,
        memory_count_limit: usize,
        disk_byte_limit: u64,
        expiration: Duration,
    ) -> Result<Self> {
        let limits = Self {
            memory_byte_limit,
            memory_count_limit,
            disk_byte_limit,
            expiration,
        };
        limits.validate()?;
        Ok(limits)
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory_byte_limit == 0 {
            return Err(CacheError::Configuration(
                "memory byte limit must be positive".to_string(),
            ));
        }
        if self.memory_count_limit == 0 {
            return Err(CacheError::Configuration(
                "memory count limit must be positive".to_string(),
            ));
        }
        if self.disk_byte_limit == 0 {
            return Err(CacheError::Configuration(
                "disk byte limit must be positive".to_string(),
            ));
        }
        if self.expiration.is_zero() {
            return Err(CacheError::Configuration(
                "expiration window must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn expiration_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.expiration).unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for CacheLimits {
    /// 100 MB / 50 entries in memory, 300 MB on disk, 7 day expiration.
    fn default() -> Self {
        Self {
            memory_byte_limit: default_memory_byte_limit(),
            memory_count_limit: default_memory_count_limit(),
            disk_byte_limit: default_disk_byte_limit(),
            expiration: Duration::from_secs(default_expiration_seconds()),
        }
    }
}

/// Where a resolved image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Memory,
    Disk,
    Network,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Memory => "memory",
            Origin::Disk => "disk",
            Origin::Network => "network",
        }
    }
}

/// A transient reference to decoded pixels, handed to the requesting view.
#[derive(Clone)]
pub struct ImageHandle {
    locator: Arc<str>,
    image: Arc<RgbaImage>,
    origin: Origin,
}

impl ImageHandle {
    pub(crate) fn new(locator: &str, image: Arc<RgbaImage>, origin: Origin) -> Self {
        Self {
            locator: Arc::from(locator),
            image,
            origin,
        }
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn image(&self) -> &Arc<RgbaImage> {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Approximate memory cost of the decoded pixels.
    pub fn byte_cost(&self) -> u64 {
        self.image.as_raw().len() as u64
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandle")
            .field("locator", &self.locator)
            .field("dimensions", &self.image.dimensions())
            .field("origin", &self.origin)
            .finish()
    }
}

pub(crate) type SharedFetch = Shared<BoxFuture<'static, Result<ImageHandle>>>;

/// An in-flight resolution shared by every caller that asked for the same
/// locator while it was pending.
///
/// Dropping a `PendingImage` only drops that caller's interest; the underlying
/// fetch keeps running for the remaining waiters.
#[derive(Clone)]
pub struct PendingImage {
    inner: SharedFetch,
}

impl PendingImage {
    pub(crate) fn new(inner: SharedFetch) -> Self {
        Self { inner }
    }
}

impl Future for PendingImage {
    type Output = Result<ImageHandle>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl fmt::Debug for PendingImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingImage").finish_non_exhaustive()
    }
}

/// Outcome of [`CacheManager::resolve`](super::CacheManager::resolve).
#[derive(Debug)]
pub enum Resolution {
    /// No locator was given; the view shows its placeholder.
    Placeholder,
    /// Memory hit, available without suspending.
    Ready(ImageHandle),
    /// Disk lookup or network fetch in progress.
    Pending(PendingImage),
    /// The request failed before any work was started.
    Failed(CacheError),
}

impl Resolution {
    pub fn is_ready(&self) -> bool {
        matches!(self, Resolution::Ready(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Resolution::Pending(_))
    }

    /// Wait for the final outcome. `Ok(None)` means "use the placeholder".
    pub async fn into_result(self) -> Result<Option<ImageHandle>> {
        match self {
            Resolution::Placeholder => Ok(None),
            Resolution::Ready(handle) => Ok(Some(handle)),
            Resolution::Pending(pending) => pending.await.map(Some),
            Resolution::Failed(err) => Err(err),
        }
    }
}

/// Statistics for cache operations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    /// Requests that missed both tiers and went to the network.
    pub misses: u64,
    pub fetch_failures: u64,
    /// Requests that joined an already pending fetch.
    pub coalesced: u64,
    pub memory_evictions: u64,
    pub disk_evictions: u64,
    pub memory_entries: usize,
    pub memory_bytes: u64,
    pub disk_entries: usize,
    pub disk_bytes: u64,
    pub in_flight: usize,
}

/// Result of an expiration sweep over the disk tier.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub bytes_freed: u64,
}
