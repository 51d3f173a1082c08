//! Disk-based persistent tier, keyed by image cache key.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

use crate::domain::entities::ImageId;
use crate::domain::errors::{CacheResult, LoadError};
use crate::domain::ports::PersistentStore;

/// Default disk budget (200 MiB).
pub const DEFAULT_DISK_BUDGET: u64 = 200 * 1024 * 1024;

/// Default maximum entry age (one week).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Persistent cache of raw image bytes, one `.img` file per entry.
///
/// Size and count are tracked in atomics seeded by an initial directory
/// scan. Over-budget cleanup removes least-recently-accessed files until
/// usage drops below the budget with 10% headroom; files older than the
/// max age are purged regardless of budget.
pub struct DiskImageCache {
    cache_dir: PathBuf,
    budget_bytes: u64,
    max_age: Duration,
    current_size: AtomicU64,
    item_count: AtomicUsize,
}

impl DiskImageCache {
    /// Opens (or creates) a cache directory and scans existing entries.
    ///
    /// # Errors
    /// Returns `CacheIo` if the directory cannot be created or read.
    pub async fn new(
        cache_dir: PathBuf,
        budget_bytes: u64,
        max_age: Duration,
    ) -> CacheResult<Self> {
        fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| LoadError::cache_io(format!("failed to create cache dir: {e}")))?;

        let mut total_size = 0u64;
        let mut count = 0usize;

        let mut entries = fs::read_dir(&cache_dir)
            .await
            .map_err(|e| LoadError::cache_io(format!("failed to read cache dir: {e}")))?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "img")
                && let Ok(meta) = entry.metadata().await
            {
                total_size += meta.len();
                count += 1;
            }
        }

        let cache = Self {
            cache_dir,
            budget_bytes,
            max_age,
            current_size: AtomicU64::new(total_size),
            item_count: AtomicUsize::new(count),
        };

        cache.purge_expired().await;
        cache.cleanup_if_needed().await;

        Ok(cache)
    }

    /// Opens a cache in the platform cache directory with defaults.
    ///
    /// # Errors
    /// Returns `CacheIo` if the directory cannot be created.
    pub async fn default_location() -> CacheResult<Self> {
        Self::new(default_cache_dir(), DEFAULT_DISK_BUDGET, DEFAULT_MAX_AGE).await
    }

    fn entry_path(&self, id: &ImageId) -> PathBuf {
        self.cache_dir.join(format!("{}.img", id.cache_key()))
    }

    /// Number of cached files.
    pub fn len(&self) -> usize {
        self.item_count.load(Ordering::Relaxed)
    }

    /// Returns true if no files are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes entries older than the max age. Runs at startup; the
    /// size-driven cleanup handles steady-state pressure.
    async fn purge_expired(&self) {
        let Ok(mut entries) = fs::read_dir(&self.cache_dir).await else {
            return;
        };

        let now = SystemTime::now();
        let mut aged_size = 0u64;
        let mut aged_count = 0usize;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "img") {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };

            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let age = now.duration_since(modified).unwrap_or_default();
            if age > self.max_age && fs::remove_file(&path).await.is_ok() {
                debug!(path = %path.display(), "purged stale cache file");
                aged_size += meta.len();
                aged_count += 1;
            }
        }

        self.current_size.fetch_sub(aged_size, Ordering::Relaxed);
        self.item_count.fetch_sub(aged_count, Ordering::Relaxed);
    }

    /// Removes least-recently-accessed entries while over budget.
    async fn cleanup_if_needed(&self) {
        let current_size = self.current_size.load(Ordering::Relaxed);
        if current_size <= self.budget_bytes {
            return;
        }

        debug!(
            current_size = current_size,
            budget = self.budget_bytes,
            "disk cache over budget, cleaning up"
        );

        let Ok(mut entries) = fs::read_dir(&self.cache_dir).await else {
            return;
        };

        let mut files: Vec<(PathBuf, SystemTime, u64)> = Vec::new();

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "img") {
                continue;
            }
            if let Ok(meta) = entry.metadata().await {
                let accessed = meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH);
                files.push((path, accessed, meta.len()));
            }
        }

        files.sort_by_key(|(_, accessed, _)| *accessed);

        let mut freed_size = 0u64;
        let mut freed_count = 0usize;
        let target = current_size - self.budget_bytes + (self.budget_bytes / 10);

        for (path, _, size) in files {
            if freed_size >= target {
                break;
            }

            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "failed to remove old cache file");
            } else {
                debug!(path = %path.display(), "removed old cache file");
                freed_size += size;
                freed_count += 1;
            }
        }

        self.current_size.fetch_sub(freed_size, Ordering::Relaxed);
        self.item_count.fetch_sub(freed_count, Ordering::Relaxed);

        debug!(
            freed_size = freed_size,
            freed_count = freed_count,
            "disk cache cleanup complete"
        );
    }
}

#[async_trait::async_trait]
impl PersistentStore for DiskImageCache {
    async fn read(&self, id: &ImageId) -> Option<Vec<u8>> {
        let path = self.entry_path(id);
        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(id = %id, path = %path.display(), "disk cache hit");
                Some(bytes)
            }
            Err(e) => {
                if e.kind() == std::io::ErrorKind::NotFound {
                    trace!(id = %id, "disk cache miss");
                } else {
                    warn!(id = %id, error = %e, "disk cache read failed, treating as miss");
                }
                None
            }
        }
    }

    async fn write(&self, id: &ImageId, bytes: &[u8]) -> CacheResult<()> {
        let path = self.entry_path(id);

        let old_size = fs::metadata(&path).await.map(|m| m.len()).ok();

        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| LoadError::cache_io(format!("failed to create cache file: {e}")))?;

        file.write_all(bytes)
            .await
            .map_err(|e| LoadError::cache_io(format!("failed to write cache file: {e}")))?;

        file.flush()
            .await
            .map_err(|e| LoadError::cache_io(format!("failed to flush cache file: {e}")))?;

        let new_size = bytes.len() as u64;
        if let Some(old) = old_size {
            if new_size > old {
                self.current_size
                    .fetch_add(new_size - old, Ordering::Relaxed);
            } else {
                self.current_size
                    .fetch_sub(old - new_size, Ordering::Relaxed);
            }
        } else {
            self.current_size.fetch_add(new_size, Ordering::Relaxed);
            self.item_count.fetch_add(1, Ordering::Relaxed);
        }

        debug!(id = %id, path = %path.display(), size = bytes.len(), "stored image bytes on disk");

        self.cleanup_if_needed().await;

        Ok(())
    }

    async fn remove(&self, id: &ImageId) {
        let path = self.entry_path(id);
        let size = fs::metadata(&path).await.map(|m| m.len()).ok();
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(id = %id, error = %e, "failed to remove disk cache entry");
            }
        } else if let Some(s) = size {
            self.current_size.fetch_sub(s, Ordering::Relaxed);
            self.item_count.fetch_sub(1, Ordering::Relaxed);
            debug!(id = %id, "removed disk cache entry");
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut entries = fs::read_dir(&self.cache_dir)
            .await
            .map_err(|e| LoadError::cache_io(format!("failed to read cache dir: {e}")))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LoadError::cache_io(format!("failed to read entry: {e}")))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "img")
                && fs::remove_file(&path).await.is_err()
            {
                warn!(path = %path.display(), "failed to remove cache file");
            }
        }
        self.current_size.store(0, Ordering::Relaxed);
        self.item_count.store(0, Ordering::Relaxed);
        debug!("cleared disk cache");
        Ok(())
    }

    async fn size_bytes(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    async fn contains(&self, id: &ImageId) -> bool {
        fs::try_exists(&self.entry_path(id)).await.unwrap_or(false)
    }
}

/// Platform cache directory for the default disk tier.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "linuxmobile", "webimage").map_or_else(
        || {
            std::env::temp_dir()
                .join("webimage")
                .join("cache")
                .join("images")
        },
        |dirs| dirs.cache_dir().join("images"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_cache() -> (DiskImageCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskImageCache::new(
            temp_dir.path().to_path_buf(),
            1024 * 1024,
            DEFAULT_MAX_AGE,
        )
        .await
        .unwrap();
        (cache, temp_dir)
    }

    #[tokio::test]
    async fn write_and_read_roundtrip() {
        let (cache, _temp) = create_test_cache().await;
        let id = ImageId::new("img://a");
        let data = b"raw image bytes";

        cache.write(&id, data).await.unwrap();
        assert_eq!(cache.read(&id).await.as_deref(), Some(data.as_slice()));
    }

    #[tokio::test]
    async fn read_miss_is_none() {
        let (cache, _temp) = create_test_cache().await;
        assert!(cache.read(&ImageId::new("img://nope")).await.is_none());
    }

    #[tokio::test]
    async fn remove_deletes_entry() {
        let (cache, _temp) = create_test_cache().await;
        let id = ImageId::new("img://a");

        cache.write(&id, b"data").await.unwrap();
        assert!(cache.contains(&id).await);

        cache.remove(&id).await;
        assert!(!cache.contains(&id).await);
    }

    #[tokio::test]
    async fn counters_track_overwrites_and_removals() {
        let (cache, _temp) = create_test_cache().await;
        let a = ImageId::new("img://a");
        let b = ImageId::new("img://b");

        cache.write(&a, b"hello").await.unwrap();
        cache.write(&b, b"world!").await.unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.size_bytes().await, 11);

        cache.write(&a, b"hey").await.unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.size_bytes().await, 9);

        cache.remove(&b).await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_bytes().await, 3);

        cache.clear().await.unwrap();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.size_bytes().await, 0);
    }

    #[tokio::test]
    async fn over_budget_cleanup_evicts_oldest() {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskImageCache::new(temp_dir.path().to_path_buf(), 10, DEFAULT_MAX_AGE)
            .await
            .unwrap();

        cache.write(&ImageId::new("img://a"), b"123456").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.write(&ImageId::new("img://b"), b"123456").await.unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_bytes().await, 6);
    }

    #[tokio::test]
    async fn reopening_rescans_existing_entries() {
        let temp_dir = TempDir::new().unwrap();
        {
            let cache = DiskImageCache::new(
                temp_dir.path().to_path_buf(),
                1024 * 1024,
                DEFAULT_MAX_AGE,
            )
            .await
            .unwrap();
            cache.write(&ImageId::new("img://a"), b"12345").await.unwrap();
        }

        let reopened = DiskImageCache::new(
            temp_dir.path().to_path_buf(),
            1024 * 1024,
            DEFAULT_MAX_AGE,
        )
        .await
        .unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.size_bytes().await, 5);
    }
}
