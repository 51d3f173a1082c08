//! Per-request options and the load request itself.

use std::sync::Arc;

use super::image::ImageId;

/// Hint for fetch ordering when requests queue up behind the
/// concurrency limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Fetch after everything else (prefetch traffic).
    Low,
    /// Default ordering.
    #[default]
    Normal,
    /// Jump the queue (on-screen content).
    High,
}

/// Options recognized by a single load call.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Bypass the memory tier on read.
    pub skip_memory_cache: bool,
    /// Bypass the persistent tier on read.
    pub skip_disk_cache: bool,
    /// Ignore the cache entirely and refetch; the result still
    /// overwrites the cache on success.
    pub force_refresh: bool,
    /// Fetch ordering hint.
    pub priority: Priority,
}

/// One load request: what to fetch and what to show meanwhile.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    /// Identifier to resolve.
    pub id: ImageId,
    /// Interim image to apply while the fetch is pending. Falls back to
    /// the engine-wide default placeholder when absent.
    pub placeholder: Option<Arc<image::DynamicImage>>,
    /// Per-request options.
    pub options: LoadOptions,
}

impl ImageRequest {
    /// Creates a request with default options and no placeholder.
    #[must_use]
    pub fn new(id: ImageId) -> Self {
        Self {
            id,
            placeholder: None,
            options: LoadOptions::default(),
        }
    }

    /// Creates a request straight from a URL.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        Self::new(ImageId::new(url))
    }

    /// Sets the interim placeholder.
    #[must_use]
    pub fn with_placeholder(mut self, placeholder: Arc<image::DynamicImage>) -> Self {
        self.placeholder = Some(placeholder);
        self
    }

    /// Sets the per-request options.
    #[must_use]
    pub fn with_options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the fetch priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.options.priority = priority;
        self
    }
}
