//! Persistent disk tier.
//!
//! Fetched bytes live in `<root>/blobs/`, one file per entry, named after the
//! SHA-256 of the locator plus a write nonce. The index (`<root>/index.json`)
//! maps locators to their blob, size, insertion time and last access.
//!
//! Index bookkeeping happens under a synchronous lock that is never held
//! across file I/O: blobs are fully written before they are published in the
//! index, and evicted blobs are unlinked after they leave it.

// Author: kelexine (https://github.com/kelexine)

use crate::cache::models::SweepReport;
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, info, warn};

const INDEX_FILE: &str = "index.json";
const BLOB_DIR: &str = "blobs";
const INDEX_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskRecord {
    file: String,
    size: u64,
    inserted_at: DateTime<Utc>,
    last_access: DateTime<Utc>,
    /// Monotonic access sequence, used for LRU ordering.
    seq: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    entries: HashMap<String, DiskRecord>,
}

#[derive(Debug)]
struct IndexState {
    entries: HashMap<String, DiskRecord>,
    total_size: u64,
    byte_limit: u64,
    expiration: Duration,
    next_seq: u64,
    /// Bumped by `take_all`; writes started under an older generation are dropped.
    generation: u64,
}

impl IndexState {
    fn touch_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn is_expired(&self, record: &DiskRecord, now: DateTime<Utc>) -> bool {
        now - record.inserted_at > self.expiration
    }

    fn remove(&mut self, locator: &str) -> Option<DiskRecord> {
        let record = self.entries.remove(locator)?;
        self.total_size -= record.size;
        Some(record)
    }

    fn least_recently_used(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, r)| r.seq)
            .map(|(k, _)| k.clone())
    }
}

/// What happened to a disk insertion.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiskInsert {
    pub stored: bool,
    pub evicted: Vec<String>,
}

#[derive(Debug)]
pub struct DiskTier {
    root: PathBuf,
    state: Mutex<IndexState>,
    persist_lock: tokio::sync::Mutex<()>,
    nonce: AtomicU64,
}

impl DiskTier {
    /// Open (or create) the disk tier rooted at `root`.
    ///
    /// Index rows whose blob has gone missing are dropped, and blobs the index
    /// does not reference are deleted.
    pub async fn open(root: impl Into<PathBuf>, byte_limit: u64, expiration: Duration) -> Result<Self> {
        let root = root.into();
        let blob_dir = root.join(BLOB_DIR);
        fs::create_dir_all(&blob_dir).await?;

        let mut entries = Self::load_index(&root).await;
        let mut missing = Vec::new();
        for (locator, record) in &entries {
            if fs::metadata(blob_dir.join(&record.file)).await.is_err() {
                missing.push(locator.clone());
            }
        }
        for locator in &missing {
            entries.remove(locator);
        }
        if !missing.is_empty() {
            warn!(count = missing.len(), "Dropped disk index rows with missing blobs");
        }

        Self::remove_orphans(&blob_dir, &entries).await?;

        let total_size = entries.values().map(|r| r.size).sum();
        let next_seq = entries.values().map(|r| r.seq + 1).max().unwrap_or(0);

        info!(
            cache_dir = %root.display(),
            entries = entries.len(),
            total_size,
            byte_limit,
            "Disk cache opened"
        );

        let nonce_seed = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;

        Ok(Self {
            root,
            state: Mutex::new(IndexState {
                entries,
                total_size,
                byte_limit,
                expiration,
                next_seq,
                generation: 0,
            }),
            persist_lock: tokio::sync::Mutex::new(()),
            nonce: AtomicU64::new(nonce_seed),
        })
    }

    async fn load_index(root: &Path) -> HashMap<String, DiskRecord> {
        let path = root.join(INDEX_FILE);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read disk index, starting empty");
                return HashMap::new();
            }
        };

        match serde_json::from_slice::<IndexFile>(&raw) {
            Ok(index) if index.version == INDEX_VERSION => index.entries,
            Ok(index) => {
                warn!(version = index.version, "Unknown disk index version, starting empty");
                HashMap::new()
            }
            Err(e) => {
                warn!(error = %e, "Corrupt disk index, starting empty");
                HashMap::new()
            }
        }
    }

    async fn remove_orphans(blob_dir: &Path, entries: &HashMap<String, DiskRecord>) -> Result<()> {
        let referenced: std::collections::HashSet<&str> =
            entries.values().map(|r| r.file.as_str()).collect();

        let mut dir = fs::read_dir(blob_dir).await?;
        let mut removed = 0usize;
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name();
            let name = name.to_string_lossy();
            if !referenced.contains(name.as_ref()) {
                if let Err(e) = fs::remove_file(item.path()).await {
                    debug!(file = %name, error = %e, "Failed to remove orphaned blob");
                } else {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(removed, "Removed orphaned blobs");
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, file: &str) -> PathBuf {
        self.root.join(BLOB_DIR).join(file)
    }

    fn blob_name(&self, locator: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(locator.as_bytes());
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
        format!("{}-{:016x}", hex::encode(hasher.finalize()), nonce)
    }

    /// Read the bytes stored for `locator`.
    ///
    /// Entries older than the expiration window read as misses even while
    /// their blob is still on disk waiting for the sweep.
    pub async fn get(&self, locator: &str, now: DateTime<Utc>) -> Result<Option<Vec<u8>>> {
        let file = {
            let mut state = self.state.lock();
            let expired = match state.entries.get(locator) {
                None => return Ok(None),
                Some(record) => state.is_expired(record, now),
            };
            if expired {
                debug!(locator, "Disk entry expired");
                return Ok(None);
            }
            let seq = state.touch_seq();
            let Some(record) = state.entries.get_mut(locator) else {
                return Ok(None);
            };
            record.last_access = now;
            record.seq = seq;
            record.file.clone()
        };

        match fs::read(self.blob_path(&file)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Evicted or cleared between the index lookup and the read.
                let mut state = self.state.lock();
                if state.entries.get(locator).is_some_and(|r| r.file == file) {
                    state.remove(locator);
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Unexpired presence check that leaves recency untouched.
    pub fn contains(&self, locator: &str, now: DateTime<Utc>) -> bool {
        let state = self.state.lock();
        state
            .entries
            .get(locator)
            .is_some_and(|r| !state.is_expired(r, now))
    }

    /// Store `bytes` for `locator`, evicting least recently used entries until
    /// the byte limit holds.
    ///
    /// `generation` must match the tier's current generation (see
    /// [`DiskTier::take_all`]); a stale write is discarded.
    pub async fn insert(
        &self,
        locator: &str,
        bytes: &[u8],
        now: DateTime<Utc>,
        generation: u64,
    ) -> Result<DiskInsert> {
        let size = bytes.len() as u64;
        {
            let state = self.state.lock();
            if size > state.byte_limit {
                debug!(locator, size, limit = state.byte_limit, "Image exceeds disk byte limit, not caching on disk");
                return Ok(DiskInsert::default());
            }
        }

        let file = self.blob_name(locator);
        let path = self.blob_path(&file);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;

        let (stored, unlink, evicted) = {
            let mut state = self.state.lock();
            if state.generation != generation || size > state.byte_limit {
                (false, vec![file], Vec::new())
            } else {
                let mut unlink = Vec::new();
                if let Some(old) = state.remove(locator) {
                    unlink.push(old.file);
                }

                let mut evicted = Vec::new();
                while state.total_size + size > state.byte_limit {
                    let Some(victim) = state.least_recently_used() else {
                        break;
                    };
                    if let Some(record) = state.remove(&victim) {
                        debug!(locator = %victim, size = record.size, "Evicted from disk tier");
                        unlink.push(record.file);
                        evicted.push(victim);
                    }
                }

                let seq = state.touch_seq();
                state.entries.insert(
                    locator.to_string(),
                    DiskRecord {
                        file,
                        size,
                        inserted_at: now,
                        last_access: now,
                        seq,
                    },
                );
                state.total_size += size;
                (true, unlink, evicted)
            }
        };

        self.unlink_blobs(unlink).await;
        if stored {
            self.persist_logged().await;
        } else {
            debug!(locator, "Disk tier cleared during write, discarding blob");
        }

        Ok(DiskInsert { stored, evicted })
    }

    pub async fn remove(&self, locator: &str) -> bool {
        let record = self.state.lock().remove(locator);
        match record {
            Some(record) => {
                self.unlink_blobs(vec![record.file]).await;
                self.persist_logged().await;
                true
            }
            None => false,
        }
    }

    /// Empty the index immediately and hand back the blobs to delete.
    ///
    /// After this returns, every lookup misses; writes still tagged with an
    /// older generation are discarded.
    pub fn take_all(&self, generation: u64) -> Vec<String> {
        let mut state = self.state.lock();
        state.generation = generation;
        state.total_size = 0;
        state.entries.drain().map(|(_, r)| r.file).collect()
    }

    /// Delete blobs previously handed out by [`DiskTier::take_all`] and
    /// persist the emptied index.
    pub async fn purge(&self, files: Vec<String>) {
        let count = files.len();
        self.unlink_blobs(files).await;
        self.persist_logged().await;
        info!(removed = count, "Disk cache cleared");
    }

    /// Remove every entry older than the expiration window.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> SweepReport {
        let expired: Vec<DiskRecord> = {
            let mut state = self.state.lock();
            let stale: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, r)| state.is_expired(r, now))
                .map(|(k, _)| k.clone())
                .collect();
            stale.iter().filter_map(|k| state.remove(k)).collect()
        };

        let report = SweepReport {
            removed: expired.len(),
            bytes_freed: expired.iter().map(|r| r.size).sum(),
        };

        if report.removed > 0 {
            self.unlink_blobs(expired.into_iter().map(|r| r.file).collect())
                .await;
            self.persist_logged().await;
            info!(
                removed = report.removed,
                bytes_freed = report.bytes_freed,
                "Expired disk entries swept"
            );
        }
        report
    }

    /// New limits apply from the next insertion or read on.
    pub fn set_limits(&self, byte_limit: u64, expiration: Duration) {
        let mut state = self.state.lock();
        state.byte_limit = byte_limit;
        state.expiration = expiration;
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.state.lock().total_size
    }

    async fn unlink_blobs(&self, files: Vec<String>) {
        for file in files {
            match fs::remove_file(self.blob_path(&file)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(file = %file, error = %e, "Failed to remove blob"),
            }
        }
    }

    /// Write the index atomically. The snapshot is taken after acquiring the
    /// persist lock, so the last writer always records the newest state.
    async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = {
            let state = self.state.lock();
            serde_json::to_vec(&IndexFile {
                version: INDEX_VERSION,
                entries: state.entries.clone(),
            })?
        };
        let path = self.root.join(INDEX_FILE);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, snapshot).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            warn!(error = %e, "Failed to persist disk index");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const WEEK: i64 = 7;

    async fn tier(dir: &TempDir, byte_limit: u64) -> DiskTier {
        DiskTier::open(dir.path(), byte_limit, Duration::days(WEEK))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let dir = TempDir::new().unwrap();
        let disk = tier(&dir, 1024).await;
        let now = Utc::now();

        let outcome = disk.insert("https://img/a.png", b"abc", now, 0).await.unwrap();
        assert!(outcome.stored);
        assert_eq!(disk.get("https://img/a.png", now).await.unwrap(), Some(b"abc".to_vec()));
        assert_eq!(disk.total_size(), 3);
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_miss() {
        let dir = TempDir::new().unwrap();
        let disk = tier(&dir, 1024).await;
        let t = Utc::now();
        disk.insert("a", b"data", t, 0).await.unwrap();

        assert!(disk.get("a", t + Duration::days(6)).await.unwrap().is_some());
        assert!(disk.get("a", t + Duration::days(8)).await.unwrap().is_none());
        // still physically present until swept
        assert_eq!(disk.len(), 1);
    }

    #[tokio::test]
    async fn test_lru_eviction_by_access() {
        let dir = TempDir::new().unwrap();
        let disk = tier(&dir, 10).await;
        let now = Utc::now();

        disk.insert("a", b"1234", now, 0).await.unwrap();
        disk.insert("b", b"1234", now, 0).await.unwrap();
        disk.get("a", now).await.unwrap();

        let outcome = disk.insert("c", b"1234", now, 0).await.unwrap();
        assert_eq!(outcome.evicted, vec!["b".to_string()]);
        assert!(disk.contains("a", now));
        assert!(disk.contains("c", now));
        assert!(disk.total_size() <= 10);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let dir = TempDir::new().unwrap();
        let disk = tier(&dir, 1024).await;
        let t = Utc::now();
        disk.insert("old", b"old", t, 0).await.unwrap();
        disk.insert("new", b"new", t + Duration::days(5), 0).await.unwrap();

        let report = disk.sweep_expired(t + Duration::days(8)).await;
        assert_eq!(report, SweepReport { removed: 1, bytes_freed: 3 });
        assert!(disk.contains("new", t + Duration::days(8)));
        assert_eq!(disk.len(), 1);
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        {
            let disk = tier(&dir, 1024).await;
            disk.insert("a", b"payload", now, 0).await.unwrap();
        }
        let disk = tier(&dir, 1024).await;
        assert_eq!(disk.get("a", now).await.unwrap(), Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn test_stale_generation_write_is_discarded() {
        let dir = TempDir::new().unwrap();
        let disk = tier(&dir, 1024).await;
        let now = Utc::now();
        disk.insert("a", b"one", now, 0).await.unwrap();

        let files = disk.take_all(1);
        disk.purge(files).await;
        assert!(disk.is_empty());

        let outcome = disk.insert("b", b"two", now, 0).await.unwrap();
        assert!(!outcome.stored);
        assert!(disk.is_empty());

        let blobs = std::fs::read_dir(dir.path().join(BLOB_DIR)).unwrap().count();
        assert_eq!(blobs, 0);
    }

    #[tokio::test]
    async fn test_oversized_payload_skipped() {
        let dir = TempDir::new().unwrap();
        let disk = tier(&dir, 4).await;
        let outcome = disk.insert("a", b"too large", Utc::now(), 0).await.unwrap();
        assert!(!outcome.stored);
        assert!(disk.is_empty());
    }
}
