//! Ports for the network and decode collaborators.

use bytes::Bytes;

use crate::domain::errors::CacheResult;

/// Port for fetching raw image bytes over the network.
///
/// Implementations must support mid-flight cancellation by being safe to
/// drop at any await point; the engine aborts the task driving the fetch
/// when the last waiter detaches.
#[async_trait::async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Performs a GET for `url` and returns the response body.
    ///
    /// # Errors
    /// Returns [`crate::domain::errors::LoadError::Network`] for
    /// unreachable hosts, timeouts, and non-2xx statuses.
    async fn fetch(&self, url: &str) -> CacheResult<Bytes>;
}

/// Port for turning raw bytes into a displayable image.
///
/// Synchronous by contract; callers run it on a blocking pool.
pub trait ImageDecoder: Send + Sync {
    /// Decodes `bytes` into an image.
    ///
    /// # Errors
    /// Returns [`crate::domain::errors::LoadError::Decode`] for
    /// malformed input.
    fn decode(&self, bytes: &[u8]) -> CacheResult<image::DynamicImage>;
}
