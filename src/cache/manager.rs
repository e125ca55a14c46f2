// Cache manager - resolves locators through memory, disk and network
// Author: kelexine (https://github.com/kelexine)

use crate::cache::clock::{Clock, SystemClock};
use crate::cache::disk::DiskTier;
use crate::cache::memory::MemoryTier;
use crate::cache::models::{
    CacheConfig, CacheLimits, CacheStats, ImageHandle, Origin, PendingImage, Resolution,
    SharedFetch, SweepReport,
};
use crate::error::{CacheError, Result};
use crate::fetch::ImageFetcher;
use crate::imaging::{self, DownsampleTarget};
use crate::metrics;
use bytes::Bytes;
use futures::FutureExt;
use image::RgbaImage;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use url::Url;

/// Canonical cache key for a locator: a parsed http(s) URL without fragment.
pub fn canonical_locator(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let mut url =
        Url::parse(raw).map_err(|e| CacheError::InvalidLocator(format!("{}: {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(CacheError::InvalidLocator(format!(
                "{}: unsupported scheme {:?}",
                raw, other
            )))
        }
    }
    if url.host_str().is_none() {
        return Err(CacheError::InvalidLocator(format!("{}: missing host", raw)));
    }

    url.set_fragment(None);
    Ok(url.into())
}

#[derive(Debug, Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    fetch_failures: AtomicU64,
    coalesced: AtomicU64,
    memory_evictions: AtomicU64,
    disk_evictions: AtomicU64,
}

struct InFlight {
    id: u64,
    future: SharedFetch,
}

struct Inner {
    memory: Mutex<MemoryTier>,
    disk: DiskTier,
    fetcher: Arc<dyn ImageFetcher>,
    clock: Arc<dyn Clock>,
    limits: Mutex<CacheLimits>,
    default_downsample: Option<DownsampleTarget>,
    /// Locator → pending fill, consulted before starting a new one.
    in_flight: Mutex<HashMap<String, InFlight>>,
    next_flight: AtomicU64,
    /// Bumped by `clear_all`; fills started under an older epoch are not cached.
    epoch: AtomicU64,
    counters: Counters,
}

/// Removes a fill from the in-flight map when its task ends, however it ends.
struct FlightGuard {
    inner: Arc<Inner>,
    key: String,
    id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut flights = self.inner.in_flight.lock();
        if flights.get(&self.key).is_some_and(|f| f.id == self.id) {
            flights.remove(&self.key);
        }
    }
}

/// Two-tier image cache.
///
/// Construct once at startup and hand clones to every consumer; clones share
/// the same tiers.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

impl CacheManager {
    /// Create a cache manager, opening the disk tier under `config.cache_dir`
    /// and starting the periodic expiration sweep unless
    /// `config.sweep_interval_seconds` is zero.
    ///
    /// Fails with a configuration error when any limit is not positive.
    pub async fn new(config: &CacheConfig, fetcher: Arc<dyn ImageFetcher>) -> Result<Self> {
        Self::with_clock(config, fetcher, Arc::new(SystemClock)).await
    }

    /// Same as [`CacheManager::new`] with an explicit time source.
    pub async fn with_clock(
        config: &CacheConfig,
        fetcher: Arc<dyn ImageFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let limits = config.limits()?;
        if let Some(target) = config.default_downsample {
            DownsampleTarget::new(target.max_width, target.max_height)?;
        }

        let disk = DiskTier::open(
            config.cache_dir.clone(),
            limits.disk_byte_limit,
            limits.expiration_window(),
        )
        .await?;

        info!(
            memory_byte_limit = limits.memory_byte_limit,
            memory_count_limit = limits.memory_count_limit,
            disk_byte_limit = limits.disk_byte_limit,
            expiration_secs = limits.expiration.as_secs(),
            "Image cache ready"
        );

        let cache = Self {
            inner: Arc::new(Inner {
                memory: Mutex::new(MemoryTier::new(
                    limits.memory_byte_limit,
                    limits.memory_count_limit,
                )),
                disk,
                fetcher,
                clock,
                limits: Mutex::new(limits),
                default_downsample: config.default_downsample,
                in_flight: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        };

        if let Some(period) = config.sweep_interval() {
            // Detached; the task stops once every clone is dropped.
            let _ = cache.spawn_expiration_sweep(period);
        }

        Ok(cache)
    }

    /// Resolve a locator to an image.
    ///
    /// Memory hits come back as [`Resolution::Ready`] without suspending.
    /// Anything else becomes [`Resolution::Pending`], shared with every other
    /// caller waiting on the same locator. An absent or blank locator yields
    /// [`Resolution::Placeholder`] without any lookup.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn resolve(&self, locator: Option<&str>, target: Option<DownsampleTarget>) -> Resolution {
        let raw = match locator.map(str::trim) {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Resolution::Placeholder,
        };

        let key = match canonical_locator(raw) {
            Ok(key) => key,
            Err(e) => {
                debug!(locator = raw, error = %e, "Rejected locator");
                return Resolution::Failed(e);
            }
        };

        if let Some(handle) = self.inner.memory_lookup(&key) {
            return Resolution::Ready(handle);
        }

        Resolution::Pending(self.inner.pending_for(key, target))
    }

    /// Resolve and wait for the outcome.
    pub async fn load(&self, locator: &str, target: Option<DownsampleTarget>) -> Result<ImageHandle> {
        match self.resolve(Some(locator), target) {
            Resolution::Placeholder => Err(CacheError::InvalidLocator("empty locator".to_string())),
            Resolution::Ready(handle) => Ok(handle),
            Resolution::Pending(pending) => pending.await,
            Resolution::Failed(e) => Err(e),
        }
    }

    /// Replace the tier bounds.
    ///
    /// Entries already cached are left alone; the new limits are enforced on
    /// the next insertion into each tier.
    pub fn configure(&self, limits: CacheLimits) -> Result<()> {
        limits.validate()?;
        self.inner
            .memory
            .lock()
            .set_limits(limits.memory_byte_limit, limits.memory_count_limit);
        self.inner
            .disk
            .set_limits(limits.disk_byte_limit, limits.expiration_window());
        *self.inner.limits.lock() = limits;

        info!(
            memory_byte_limit = limits.memory_byte_limit,
            memory_count_limit = limits.memory_count_limit,
            disk_byte_limit = limits.disk_byte_limit,
            expiration_secs = limits.expiration.as_secs(),
            "Image cache reconfigured"
        );
        Ok(())
    }

    pub fn limits(&self) -> CacheLimits {
        *self.inner.limits.lock()
    }

    /// Empty both tiers.
    ///
    /// Memory and the disk index are emptied before this returns, so every
    /// later lookup misses. Blob deletion runs in the background on the
    /// returned task. Pending fills are detached: their waiters still get a
    /// result, but it is not cached.
    pub fn clear_all(&self) -> JoinHandle<()> {
        let files = {
            let mut memory = self.inner.memory.lock();
            let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            memory.clear();
            self.inner.disk.take_all(epoch)
        };
        let detached = {
            let mut flights = self.inner.in_flight.lock();
            let count = flights.len();
            flights.clear();
            count
        };

        metrics::record_cache_clear("memory");
        metrics::record_cache_clear("disk");
        metrics::update_tier_size("memory", 0, 0);
        info!(disk_blobs = files.len(), detached, "Clearing image cache");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.disk.purge(files).await;
            metrics::update_tier_size("disk", inner.disk.len(), inner.disk.total_size());
        })
    }

    /// Empty the memory tier only, e.g. on a low-memory signal.
    pub fn clear_memory_only(&self) {
        let removed = self.inner.memory.lock().clear();
        metrics::record_cache_clear("memory");
        metrics::update_tier_size("memory", 0, 0);
        info!(removed, "Cleared image memory cache");
    }

    /// Remove every expired disk entry now.
    pub async fn sweep_expired(&self) -> SweepReport {
        self.inner.sweep().await
    }

    /// Run [`CacheManager::sweep_expired`] every `period` until the task is
    /// aborted or every `CacheManager` clone has been dropped.
    pub fn spawn_expiration_sweep(&self, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = period.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    debug!("Image cache dropped, stopping expiration sweep");
                    break;
                };
                inner.sweep().await;
            }
        })
    }

    pub fn contains_in_memory(&self, locator: &str) -> bool {
        canonical_locator(locator)
            .map(|key| self.inner.memory.lock().contains(&key))
            .unwrap_or(false)
    }

    /// Whether an unexpired entry for `locator` is on disk.
    pub fn contains_on_disk(&self, locator: &str) -> bool {
        canonical_locator(locator)
            .map(|key| self.inner.disk.contains(&key, self.inner.clock.now()))
            .unwrap_or(false)
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        let (memory_entries, memory_bytes) = {
            let memory = self.inner.memory.lock();
            (memory.len(), memory.total_cost())
        };
        CacheStats {
            memory_hits: counters.memory_hits.load(Ordering::Relaxed),
            disk_hits: counters.disk_hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            fetch_failures: counters.fetch_failures.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            memory_evictions: counters.memory_evictions.load(Ordering::Relaxed),
            disk_evictions: counters.disk_evictions.load(Ordering::Relaxed),
            memory_entries,
            memory_bytes,
            disk_entries: self.inner.disk.len(),
            disk_bytes: self.inner.disk.total_size(),
            in_flight: self.inner.in_flight.lock().len(),
        }
    }
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("cache_dir", &self.inner.disk.root())
            .field("limits", &self.limits())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Inner {
    fn memory_lookup(&self, key: &str) -> Option<ImageHandle> {
        let image = self.memory.lock().get(key, self.clock.now())?;
        self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_hit("memory");
        debug!(locator = key, "Memory cache hit");
        Some(ImageHandle::new(key, image, Origin::Memory))
    }

    fn pending_for(self: &Arc<Self>, key: String, target: Option<DownsampleTarget>) -> PendingImage {
        let mut flights = self.in_flight.lock();

        if let Some(flight) = flights.get(&key) {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            metrics::record_coalesced_request();
            debug!(locator = %key, "Joined pending image fill");
            return PendingImage::new(flight.future.clone());
        }

        // A fill may have landed between the caller's memory miss and this lock.
        if let Some(handle) = self.memory_lookup(&key) {
            return PendingImage::new(futures::future::ready(Ok(handle)).boxed().shared());
        }
        metrics::record_cache_miss("memory");

        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let epoch = self.epoch.load(Ordering::SeqCst);
        let guard = FlightGuard {
            inner: Arc::clone(self),
            key: key.clone(),
            id,
        };

        let task = tokio::spawn(async move {
            let guard = guard;
            guard.inner.fill(&guard.key, target, epoch).await
        });

        let future: SharedFetch = task
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(CacheError::Internal(format!("image fill task failed: {}", e)))
                })
            })
            .boxed()
            .shared();

        debug!(locator = %key, "Started image fill");
        flights.insert(
            key,
            InFlight {
                id,
                future: future.clone(),
            },
        );
        PendingImage::new(future)
    }

    async fn fill(&self, key: &str, target: Option<DownsampleTarget>, epoch: u64) -> Result<ImageHandle> {
        let target = target.or(self.default_downsample);

        if let Some(handle) = self.load_from_disk(key, target, epoch).await {
            return Ok(handle);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_miss("disk");
        self.fetch_from_network(key, target, epoch).await
    }

    async fn load_from_disk(
        &self,
        key: &str,
        target: Option<DownsampleTarget>,
        epoch: u64,
    ) -> Option<ImageHandle> {
        let bytes = match self.disk.get(key, self.clock.now()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(locator = key, error = %e, "Disk cache read failed");
                return None;
            }
        };

        match imaging::decode_blocking(Bytes::from(bytes), target).await {
            Ok(image) => {
                self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_hit("disk");
                debug!(locator = key, "Disk cache hit");
                Some(self.promote(key, image, epoch, Origin::Disk))
            }
            Err(e) => {
                warn!(locator = key, error = %e, "Dropping undecodable disk entry");
                self.disk.remove(key).await;
                None
            }
        }
    }

    async fn fetch_from_network(
        &self,
        key: &str,
        target: Option<DownsampleTarget>,
        epoch: u64,
    ) -> Result<ImageHandle> {
        let started = Instant::now();

        let bytes = match self.fetcher.fetch(key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_fetch("fetch_error", started.elapsed().as_secs_f64());
                warn!(locator = key, error = %e, "Image fetch failed");
                return Err(e);
            }
        };

        let image = match imaging::decode_blocking(bytes.clone(), target).await {
            Ok(image) => image,
            Err(e) => {
                self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_fetch("decode_error", started.elapsed().as_secs_f64());
                warn!(locator = key, error = %e, "Fetched image could not be decoded");
                return Err(e);
            }
        };
        metrics::record_fetch("success", started.elapsed().as_secs_f64());

        let handle = self.promote(key, image, epoch, Origin::Network);

        match self.disk.insert(key, &bytes, self.clock.now(), epoch).await {
            Ok(outcome) => {
                let evicted = outcome.evicted.len();
                self.counters
                    .disk_evictions
                    .fetch_add(evicted as u64, Ordering::Relaxed);
                metrics::record_cache_evictions("disk", evicted);
                metrics::update_tier_size("disk", self.disk.len(), self.disk.total_size());
            }
            Err(e) => warn!(locator = key, error = %e, "Failed to write image to disk cache"),
        }

        Ok(handle)
    }

    /// Insert freshly decoded pixels into memory unless the cache was cleared
    /// since the fill started.
    fn promote(&self, key: &str, image: RgbaImage, epoch: u64, origin: Origin) -> ImageHandle {
        let image = Arc::new(image);
        let mut memory = self.memory.lock();
        if self.epoch.load(Ordering::SeqCst) == epoch {
            let outcome = memory.insert(key, Arc::clone(&image), self.clock.now());
            let evicted = outcome.evicted.len();
            self.counters
                .memory_evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
            metrics::record_cache_evictions("memory", evicted);
            metrics::update_tier_size("memory", memory.len(), memory.total_cost());
        } else {
            debug!(locator = key, "Cache cleared during fill, not caching");
        }
        ImageHandle::new(key, image, origin)
    }

    async fn sweep(&self) -> SweepReport {
        let report = self.disk.sweep_expired(self.clock.now()).await;
        metrics::record_cache_expired(report.removed);
        metrics::update_tier_size("disk", self.disk.len(), self.disk.total_size());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct StubFetcher {
        body: Bytes,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ImageFetcher for StubFetcher {
        async fn fetch(&self, _locator: &str) -> Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(self.body.clone())
        }
    }

    fn png(side: u32) -> Bytes {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(RgbaImage::new(side, side))
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        Bytes::from(buf.into_inner())
    }

    async fn manager(dir: &TempDir) -> (CacheManager, Arc<StubFetcher>) {
        let fetcher = Arc::new(StubFetcher {
            body: png(4),
            calls: AtomicUsize::new(0),
        });
        let config = CacheConfig {
            cache_dir: dir.path().to_path_buf(),
            ..CacheConfig::default()
        };
        let manager = CacheManager::new(&config, fetcher.clone()).await.unwrap();
        (manager, fetcher)
    }

    #[test]
    fn test_canonical_locator() {
        assert_eq!(
            canonical_locator("  HTTPS://Example.COM:443/a.png#frag ").unwrap(),
            "https://example.com/a.png"
        );
        assert!(canonical_locator("ftp://example.com/a.png").is_err());
        assert!(canonical_locator("not a url").is_err());
    }

    #[tokio::test]
    async fn test_absent_locator_is_placeholder() {
        let dir = TempDir::new().unwrap();
        let (cache, fetcher) = manager(&dir).await;

        assert!(matches!(cache.resolve(None, None), Resolution::Placeholder));
        assert!(matches!(cache.resolve(Some("   "), None), Resolution::Placeholder));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_locator_fails_without_fetch() {
        let dir = TempDir::new().unwrap();
        let (cache, fetcher) = manager(&dir).await;

        let resolution = cache.resolve(Some("mailto:coach@example.com"), None);
        assert!(matches!(resolution, Resolution::Failed(CacheError::InvalidLocator(_))));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_resolve_is_ready_from_memory() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = manager(&dir).await;
        let url = "https://cdn.example.com/meal.png";

        let first = cache.load(url, None).await.unwrap();
        assert_eq!(first.origin(), Origin::Network);

        match cache.resolve(Some(url), None) {
            Resolution::Ready(handle) => assert_eq!(handle.origin(), Origin::Memory),
            other => panic!("expected memory hit, got {:?}", other),
        }
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_clear_during_fill_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = manager(&dir).await;
        let url = "https://cdn.example.com/avatar.png";

        let pending = match cache.resolve(Some(url), None) {
            Resolution::Pending(pending) => pending,
            other => panic!("expected pending, got {:?}", other),
        };
        cache.clear_all().await.unwrap();

        // The waiter still gets its image.
        assert!(pending.await.is_ok());
        assert!(!cache.contains_in_memory(url));
        assert!(!cache.contains_on_disk(url));
    }

    #[tokio::test]
    async fn test_configure_rejects_zero_limits() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = manager(&dir).await;

        let bad = CacheLimits {
            memory_count_limit: 0,
            ..CacheLimits::default()
        };
        assert!(matches!(cache.configure(bad), Err(CacheError::Configuration(_))));
        assert_eq!(cache.limits(), CacheLimits::default());
    }
}
