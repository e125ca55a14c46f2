// Disk tier capacity properties
// Author: kelexine (https://github.com/kelexine)

use chrono::{Duration, Utc};
use platecache::cache::disk::DiskTier;
use proptest::prelude::*;
use tempfile::TempDir;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_disk_size_never_exceeds_limit(
        byte_limit in 8u64..512,
        ops in prop::collection::vec((0u8..10, 1usize..128, any::<bool>()), 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let dir = TempDir::new().unwrap();
            let disk = DiskTier::open(dir.path(), byte_limit, Duration::days(7)).await.unwrap();
            let now = Utc::now();

            for (key, len, read_first) in ops {
                let key = format!("https://img.example.com/{key}.png");
                if read_first {
                    disk.get(&key, now).await.unwrap();
                }
                disk.insert(&key, &vec![7u8; len], now, 0).await.unwrap();
                prop_assert!(disk.total_size() <= byte_limit);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}

#[tokio::test]
async fn test_corrupt_index_starts_empty() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("index.json"), b"{not json").unwrap();

    let disk = DiskTier::open(dir.path(), 1024, Duration::days(7)).await.unwrap();
    assert!(disk.is_empty());
    assert_eq!(disk.total_size(), 0);
}

#[tokio::test]
async fn test_missing_blob_is_dropped_on_open() {
    let dir = TempDir::new().unwrap();
    let now = Utc::now();
    {
        let disk = DiskTier::open(dir.path(), 1024, Duration::days(7)).await.unwrap();
        disk.insert("https://img.example.com/a.png", b"aaaa", now, 0).await.unwrap();
        disk.insert("https://img.example.com/b.png", b"bb", now, 0).await.unwrap();
    }

    // Remove every blob behind the cache's back.
    for entry in std::fs::read_dir(dir.path().join("blobs")).unwrap() {
        std::fs::remove_file(entry.unwrap().path()).unwrap();
    }

    let disk = DiskTier::open(dir.path(), 1024, Duration::days(7)).await.unwrap();
    assert!(disk.is_empty());
}

#[tokio::test]
async fn test_blob_removed_after_lookup_reads_as_miss() {
    let dir = TempDir::new().unwrap();
    let now = Utc::now();
    let disk = DiskTier::open(dir.path(), 1024, Duration::days(7)).await.unwrap();
    disk.insert("https://img.example.com/a.png", b"aaaa", now, 0).await.unwrap();

    for entry in std::fs::read_dir(dir.path().join("blobs")).unwrap() {
        std::fs::remove_file(entry.unwrap().path()).unwrap();
    }

    assert_eq!(disk.get("https://img.example.com/a.png", now).await.unwrap(), None);
    assert!(disk.is_empty());
}
