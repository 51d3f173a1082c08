//! Infrastructure layer: adapters for storage, network, and decoding.

pub mod cache;
pub mod codec;
pub mod config;
pub mod http;

pub use cache::{CacheStats, CacheStore, DiskImageCache, MemoryImageCache, default_cache_dir};
pub use codec::ImageCodec;
pub use config::{AppConfig, FileConfig, LogLevel};
pub use http::HttpFetcher;
