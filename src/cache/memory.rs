//! In-memory tier: decoded images bounded by total byte cost and entry count.
//!
//! Recency is tracked by the `lru` ordering, so the entry with the oldest
//! access is always the first evicted. The tier is not synchronised on its own;
//! the manager keeps it behind a single mutex so the cost and count totals are
//! updated in the same step as the entry write.

// Author: kelexine (https://github.com/kelexine)

use chrono::{DateTime, Utc};
use image::RgbaImage;
use lru::LruCache;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryEntry {
    image: Arc<RgbaImage>,
    cost: u64,
    last_access: DateTime<Utc>,
}

/// What happened to an insertion.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryInsert {
    /// False when the image alone exceeds the byte limit.
    pub stored: bool,
    /// Locators removed to make room, oldest access first.
    pub evicted: Vec<String>,
}

#[derive(Debug)]
pub struct MemoryTier {
    entries: LruCache<String, MemoryEntry>,
    total_cost: u64,
    byte_limit: u64,
    count_limit: usize,
}

impl MemoryTier {
    pub fn new(byte_limit: u64, count_limit: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            total_cost: 0,
            byte_limit,
            count_limit,
        }
    }

    /// Look up an image and refresh its access timestamp.
    pub fn get(&mut self, locator: &str, now: DateTime<Utc>) -> Option<Arc<RgbaImage>> {
        let entry = self.entries.get_mut(locator)?;
        entry.last_access = now;
        Some(Arc::clone(&entry.image))
    }

    /// Presence check without touching recency.
    pub fn contains(&self, locator: &str) -> bool {
        self.entries.contains(locator)
    }

    pub fn last_access(&self, locator: &str) -> Option<DateTime<Utc>> {
        self.entries.peek(locator).map(|e| e.last_access)
    }

    /// Insert an image, evicting least recently used entries until it fits
    /// within both limits.
    pub fn insert(
        &mut self,
        locator: &str,
        image: Arc<RgbaImage>,
        now: DateTime<Utc>,
    ) -> MemoryInsert {
        let cost = image.as_raw().len() as u64;

        // A replaced entry must not linger with its old pixels either way.
        self.remove(locator);

        if cost > self.byte_limit {
            debug!(
                locator,
                cost,
                limit = self.byte_limit,
                "Image exceeds memory byte limit, not caching in memory"
            );
            return MemoryInsert::default();
        }

        let mut evicted = Vec::new();
        while self.entries.len() + 1 > self.count_limit || self.total_cost + cost > self.byte_limit {
            match self.entries.pop_lru() {
                Some((key, entry)) => {
                    self.total_cost -= entry.cost;
                    debug!(locator = %key, cost = entry.cost, "Evicted from memory tier");
                    evicted.push(key);
                }
                None => break,
            }
        }

        self.entries.push(
            locator.to_string(),
            MemoryEntry {
                image,
                cost,
                last_access: now,
            },
        );
        self.total_cost += cost;

        MemoryInsert {
            stored: true,
            evicted,
        }
    }

    pub fn remove(&mut self, locator: &str) -> bool {
        match self.entries.pop(locator) {
            Some(entry) => {
                self.total_cost -= entry.cost;
                true
            }
            None => false,
        }
    }

    /// Drop every entry, returning how many were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.total_cost = 0;
        removed
    }

    /// New limits apply from the next insertion on; nothing is evicted here.
    pub fn set_limits(&mut self, byte_limit: u64, count_limit: usize) {
        self.byte_limit = byte_limit;
        self.count_limit = count_limit;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_cost(&self) -> u64 {
        self.total_cost
    }
}
