//! Two-tier cache store: memory in front of an optional persistent tier.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::entities::{ImageId, ImageSource, LoadOptions};
use crate::domain::ports::{ImageDecoder, PersistentStore};

use super::memory_cache::{CacheStats, MemoryImageCache};

/// Coordinated view over the memory and persistent tiers.
///
/// All reads and writes for an identifier go through here so the
/// one-entry-per-id invariant holds across tiers: a successful fetch
/// overwrites both. The persistent tier is optional; constrained
/// deployments run memory-only.
pub struct CacheStore {
    memory: MemoryImageCache,
    disk: Option<Arc<dyn PersistentStore>>,
    decoder: Arc<dyn ImageDecoder>,
}

impl CacheStore {
    /// Builds a store over the given tiers.
    #[must_use]
    pub fn new(
        memory: MemoryImageCache,
        disk: Option<Arc<dyn PersistentStore>>,
        decoder: Arc<dyn ImageDecoder>,
    ) -> Self {
        Self {
            memory,
            disk,
            decoder,
        }
    }

    /// Looks up `id`, walking memory then disk per `options`.
    ///
    /// A disk hit is decoded off the async runtime and promoted into the
    /// memory tier. A corrupted persistent entry is removed and treated
    /// as absent; it never fails the lookup.
    pub async fn get(
        &self,
        id: &ImageId,
        options: &LoadOptions,
    ) -> Option<(Arc<image::DynamicImage>, ImageSource)> {
        if !options.skip_memory_cache
            && let Some(image) = self.memory.get(id).await
        {
            return Some((image, ImageSource::MemoryCache));
        }

        if options.skip_disk_cache {
            return None;
        }

        let disk = self.disk.as_ref()?;
        let bytes = disk.read(id).await?;

        let decoder = self.decoder.clone();
        let decoded = tokio::task::spawn_blocking(move || decoder.decode(&bytes)).await;

        match decoded {
            Ok(Ok(image)) => {
                debug!(id = %id, "decoded image from disk cache");
                let image = Arc::new(image);
                if !options.skip_memory_cache {
                    self.memory.put(id.clone(), image.clone()).await;
                }
                Some((image, ImageSource::DiskCache))
            }
            Ok(Err(e)) => {
                warn!(id = %id, error = %e, "corrupted disk cache entry, removing");
                disk.remove(id).await;
                None
            }
            Err(e) => {
                warn!(id = %id, error = %e, "disk decode task panicked");
                None
            }
        }
    }

    /// Stores a fetched image in both tiers (refresh-on-success).
    ///
    /// Disk write failures are logged and swallowed; the memory tier is
    /// already up to date by then.
    pub async fn put(&self, id: &ImageId, image: Arc<image::DynamicImage>, bytes: &[u8]) {
        self.memory.put(id.clone(), image).await;

        if let Some(disk) = &self.disk
            && let Err(e) = disk.write(id, bytes).await
        {
            warn!(id = %id, error = %e, "failed to cache image bytes to disk");
        }
    }

    /// Invalidates `id` in both tiers.
    pub async fn remove(&self, id: &ImageId) {
        self.memory.remove(id).await;
        if let Some(disk) = &self.disk {
            disk.remove(id).await;
        }
    }

    /// Clears both tiers.
    pub async fn clear(&self) {
        self.memory.clear().await;
        if let Some(disk) = &self.disk
            && let Err(e) = disk.clear().await
        {
            warn!(error = %e, "failed to clear disk cache");
        }
    }

    /// Clears only the memory tier, leaving persistent entries for the
    /// next session.
    pub async fn clear_memory(&self) {
        self.memory.clear().await;
    }

    /// Combined usage of both tiers in bytes.
    pub async fn current_size_bytes(&self) -> u64 {
        let mut total = self.memory.size_bytes();
        if let Some(disk) = &self.disk {
            total += disk.size_bytes().await;
        }
        total
    }

    /// Memory-tier statistics.
    #[must_use]
    pub fn memory_stats(&self) -> CacheStats {
        self.memory.stats()
    }
}
