//! Load error taxonomy.

use thiserror::Error;

/// Result type for load and cache operations.
pub type CacheResult<T> = std::result::Result<T, LoadError>;

/// Errors that can end a load.
///
/// `Clone` with owned message payloads so one failure can be fanned out
/// to every waiter attached to the same in-flight fetch.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// Network failure: unreachable host, timeout, or a non-2xx status.
    #[error("network error: {0}")]
    Network(String),

    /// The fetched bytes are not a decodable image.
    #[error("decode error: {0}")]
    Decode(String),

    /// The request was cancelled before completion. Never surfaced as a
    /// user-visible failure; the caller that cancelled already knows.
    #[error("request cancelled")]
    Cancelled,

    /// Persistent-tier read/write failure. Always recovered locally as a
    /// cache miss (or a skipped write); never crosses the cache boundary.
    #[error("cache I/O error: {0}")]
    CacheIo(String),
}

impl LoadError {
    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Creates a cache I/O error.
    #[must_use]
    pub fn cache_io(message: impl Into<String>) -> Self {
        Self::CacheIo(message.into())
    }

    /// Returns true for silent cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
