//! Port for the persistent cache tier.

use crate::domain::entities::ImageId;
use crate::domain::errors::CacheResult;

/// Byte-level persistent store consulted on memory-tier misses.
///
/// Implementations must be thread-safe. I/O failures never escape the
/// cache: a failed read is reported as absent and a failed write is a
/// logged no-op at the call site.
#[async_trait::async_trait]
pub trait PersistentStore: Send + Sync {
    /// Reads the stored bytes for `id`, or `None` if absent/unreadable.
    async fn read(&self, id: &ImageId) -> Option<Vec<u8>>;

    /// Writes the bytes for `id`, overwriting any existing entry.
    ///
    /// # Errors
    /// Returns [`crate::domain::errors::LoadError::CacheIo`] if the
    /// entry cannot be written.
    async fn write(&self, id: &ImageId, bytes: &[u8]) -> CacheResult<()>;

    /// Removes the entry for `id`, if present.
    async fn remove(&self, id: &ImageId);

    /// Removes every entry.
    ///
    /// # Errors
    /// Returns [`crate::domain::errors::LoadError::CacheIo`] if the
    /// store cannot be enumerated.
    async fn clear(&self) -> CacheResult<()>;

    /// Current total size of stored entries in bytes.
    async fn size_bytes(&self) -> u64;

    /// Returns true if an entry for `id` exists.
    async fn contains(&self, id: &ImageId) -> bool;
}
