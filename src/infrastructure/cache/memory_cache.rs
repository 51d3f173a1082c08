//! In-memory LRU image cache bounded by a byte budget.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::domain::entities::ImageId;

/// Default memory budget (64 MiB of decoded pixels).
pub const DEFAULT_MEMORY_BUDGET: u64 = 64 * 1024 * 1024;

/// One cached decoded image plus bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The decoded image.
    pub image: Arc<image::DynamicImage>,
    /// Estimated decoded size (width x height x 4).
    pub size_bytes: u64,
    /// Updated on every hit.
    pub last_access: Instant,
    /// Entry reads as absent past this deadline.
    pub expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(image: Arc<image::DynamicImage>, ttl: Option<Duration>) -> Self {
        let size_bytes = estimate_decoded_size(&image);
        Self {
            image,
            size_bytes,
            last_access: Instant::now(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Estimates the in-memory footprint of a decoded image.
#[must_use]
pub fn estimate_decoded_size(image: &image::DynamicImage) -> u64 {
    u64::from(image.width()) * u64::from(image.height()) * 4
}

struct LruState {
    entries: LruCache<ImageId, CacheEntry>,
    total_bytes: u64,
}

/// Memory tier: LRU over decoded images, evicting by last access until
/// total estimated bytes fit the budget after each insert.
pub struct MemoryImageCache {
    state: RwLock<LruState>,
    budget_bytes: u64,
    entry_ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a cache with the given byte budget and optional per-entry
    /// time to live.
    #[must_use]
    pub fn new(budget_bytes: u64, entry_ttl: Option<Duration>) -> Self {
        Self {
            state: RwLock::new(LruState {
                entries: LruCache::unbounded(),
                total_bytes: 0,
            }),
            budget_bytes: budget_bytes.max(1),
            entry_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache with the default budget and no TTL.
    #[must_use]
    pub fn with_default_budget() -> Self {
        Self::new(DEFAULT_MEMORY_BUDGET, None)
    }

    /// Gets an image, promoting it in the LRU and refreshing last-access.
    pub async fn get(&self, id: &ImageId) -> Option<Arc<image::DynamicImage>> {
        let mut state = self.state.write().await;

        let expired = match state.entries.get_mut(id) {
            Some(entry) if entry.is_expired() => true,
            Some(entry) => {
                entry.last_access = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(id = %id, "memory cache hit");
                return Some(entry.image.clone());
            }
            None => false,
        };

        if expired && let Some(entry) = state.entries.pop(id) {
            state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
            debug!(id = %id, "memory cache entry expired");
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(id = %id, "memory cache miss");
        None
    }

    /// Peeks without promoting or touching last-access.
    pub async fn peek(&self, id: &ImageId) -> Option<Arc<image::DynamicImage>> {
        let state = self.state.read().await;
        state
            .entries
            .peek(id)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.image.clone())
    }

    /// Inserts an image, overwriting any existing entry for the same id,
    /// then evicts least-recently-used entries until usage fits the
    /// budget. An image larger than the whole budget is not retained.
    pub async fn put(&self, id: ImageId, image: Arc<image::DynamicImage>) {
        let entry = CacheEntry::new(image, self.entry_ttl);
        let mut state = self.state.write().await;

        if let Some(old) = state.entries.pop(&id) {
            state.total_bytes = state.total_bytes.saturating_sub(old.size_bytes);
        }

        state.total_bytes += entry.size_bytes;
        debug!(id = %id, size = entry.size_bytes, "storing image in memory cache");
        state.entries.put(id, entry);

        while state.total_bytes > self.budget_bytes {
            let Some((evicted_id, evicted)) = state.entries.pop_lru() else {
                break;
            };
            state.total_bytes = state.total_bytes.saturating_sub(evicted.size_bytes);
            debug!(id = %evicted_id, size = evicted.size_bytes, "evicted from memory cache");
        }
    }

    /// Removes the entry for `id`, if present.
    pub async fn remove(&self, id: &ImageId) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.entries.pop(id) {
            state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
            debug!(id = %id, "removed from memory cache");
        }
    }

    /// Drops every entry.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.total_bytes = 0;
        debug!("cleared memory image cache");
    }

    /// Current estimated usage in bytes. Best effort under contention.
    pub fn size_bytes(&self) -> u64 {
        self.state.try_read().map_or(0, |state| state.total_bytes)
    }

    /// Number of cached entries. Best effort under contention.
    pub fn len(&self) -> usize {
        self.state.try_read().map_or(0, |state| state.entries.len())
    }

    /// Returns true if no entries are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns hit/miss statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits,
            misses,
            hit_rate,
            entries: self.len(),
            bytes: self.size_bytes(),
        }
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_budget()
    }
}

/// Statistics about memory-tier performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub entries: usize,
    /// Current estimated usage in bytes.
    pub bytes: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cache: {} images, {} bytes, {:.1}% hit rate ({} hits, {} misses)",
            self.entries, self.bytes, self.hit_rate, self.hits, self.misses
        )
    }
}
