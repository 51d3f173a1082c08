//! Cache tiers and the store coordinating them.

pub mod disk_cache;
pub mod memory_cache;
pub mod store;

pub use disk_cache::{DEFAULT_DISK_BUDGET, DEFAULT_MAX_AGE, DiskImageCache, default_cache_dir};
pub use memory_cache::{CacheStats, DEFAULT_MEMORY_BUDGET, MemoryImageCache};
pub use store::CacheStore;
