//! HTTP adapter for the fetch port.

use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::domain::errors::{CacheResult, LoadError};
use crate::domain::ports::ImageFetcher;

/// Fetches image bytes with a shared reqwest client.
///
/// Cancellation comes for free: dropping the in-progress future aborts
/// the transfer, which is how the coordinator cancels a fetch whose last
/// waiter detached.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Builds a fetcher with the given request timeout and user agent.
    ///
    /// # Errors
    /// Returns `Network` if the client cannot be constructed.
    pub fn new(timeout: Duration, user_agent: &str) -> CacheResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| LoadError::network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> CacheResult<Bytes> {
        debug!(url = %url, "downloading image");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LoadError::network(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(LoadError::network(format!(
                "HTTP {}: {}",
                response.status(),
                response.status().canonical_reason().unwrap_or("unknown")
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| LoadError::network(format!("failed to read body: {e}")))
    }
}
