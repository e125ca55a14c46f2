// Shared test fixtures
// Author: kelexine (https://github.com/kelexine)

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use image::{DynamicImage, ImageFormat, RgbaImage};
use parking_lot::Mutex;
use platecache::cache::{CacheConfig, CacheManager, ManualClock};
use platecache::error::{CacheError, Result};
use platecache::fetch::ImageFetcher;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub fn png(width: u32, height: u32) -> Bytes {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(RgbaImage::new(width, height))
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    Bytes::from(buf.into_inner())
}

/// Fetcher serving canned responses and counting calls per locator.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, Result<Bytes>>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Duration,
}

impl ScriptedFetcher {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn serve(&self, locator: &str, body: Bytes) {
        self.responses.lock().insert(locator.to_string(), Ok(body));
    }

    pub fn fail(&self, locator: &str, err: CacheError) {
        self.responses.lock().insert(locator.to_string(), Err(err));
    }

    pub fn calls(&self, locator: &str) -> usize {
        self.calls.lock().get(locator).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

#[async_trait]
impl ImageFetcher for ScriptedFetcher {
    async fn fetch(&self, locator: &str) -> Result<Bytes> {
        *self.calls.lock().entry(locator.to_string()).or_default() += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.responses
            .lock()
            .get(locator)
            .cloned()
            .unwrap_or_else(|| Err(CacheError::FetchStatus {
                locator: locator.to_string(),
                status: 404,
            }))
    }
}

pub struct Harness {
    pub cache: CacheManager,
    pub fetcher: Arc<ScriptedFetcher>,
    pub clock: Arc<ManualClock>,
    pub dir: TempDir,
}

pub async fn harness(configure: impl FnOnce(&mut CacheConfig)) -> Harness {
    harness_with(ScriptedFetcher::default(), configure).await
}

pub async fn harness_with(
    fetcher: ScriptedFetcher,
    configure: impl FnOnce(&mut CacheConfig),
) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = CacheConfig {
        cache_dir: dir.path().to_path_buf(),
        ..CacheConfig::default()
    };
    configure(&mut config);

    let fetcher = Arc::new(fetcher);
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap()));
    let cache = CacheManager::with_clock(&config, fetcher.clone(), clock.clone())
        .await
        .unwrap();

    Harness {
        cache,
        fetcher,
        clock,
        dir,
    }
}
