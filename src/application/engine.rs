//! The engine facade UI code talks to.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::domain::entities::{
    ImageId, ImageRequest, ImageSource, LoadOptions, LoadedImage, Priority, TargetId,
};
use crate::domain::errors::{CacheResult, LoadError};
use crate::domain::ports::{ImageDecoder, ImageFetcher, PersistentStore, RemoteImageLoader};
use crate::infrastructure::cache::{
    CacheStats, CacheStore, DEFAULT_DISK_BUDGET, DEFAULT_MAX_AGE, DEFAULT_MEMORY_BUDGET,
    DiskImageCache, MemoryImageCache, default_cache_dir,
};
use crate::infrastructure::codec::ImageCodec;
use crate::infrastructure::http::HttpFetcher;

use super::binding::BindingTracker;
use super::coordinator::{FetchCoordinator, WaiterId};

/// Engine configuration. Tier sizes, retry counts, and placeholders are
/// deliberately configurable rather than fixed.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Memory tier budget in bytes.
    pub memory_budget_bytes: u64,
    /// Optional TTL for memory-tier entries.
    pub memory_entry_ttl: Option<Duration>,
    /// Persistent tier budget in bytes.
    pub disk_budget_bytes: u64,
    /// Persistent tier directory; `None` disables the tier.
    pub disk_cache_dir: Option<PathBuf>,
    /// Maximum age of persistent entries.
    pub disk_max_age: Duration,
    /// Maximum concurrent network fetches.
    pub max_concurrent_fetches: usize,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Extra fetch attempts after a network error.
    pub fetch_retries: u32,
    /// Downscale decoded images past this dimension.
    pub max_decode_dimension: Option<u32>,
    /// User agent sent with fetches.
    pub user_agent: String,
    /// Placeholder applied while a fetch is pending, when the request
    /// carries none.
    pub default_placeholder: Option<Arc<image::DynamicImage>>,
    /// Placeholder applied when a fetch fails.
    pub error_placeholder: Option<Arc<image::DynamicImage>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET,
            memory_entry_ttl: None,
            disk_budget_bytes: DEFAULT_DISK_BUDGET,
            disk_cache_dir: Some(default_cache_dir()),
            disk_max_age: DEFAULT_MAX_AGE,
            max_concurrent_fetches: 4,
            timeout_secs: 30,
            fetch_retries: 0,
            max_decode_dimension: None,
            user_agent: concat!("webimage/", env!("CARGO_PKG_VERSION")).to_owned(),
            default_placeholder: None,
            error_placeholder: None,
        }
    }
}

/// Apply-step event delivered on the engine's event channel.
///
/// The engine never mutates a display target itself; the owner of the
/// receiving end applies events on its own context. Every `load` call
/// produces at most one terminal event (`Loaded` or `Failed`), possibly
/// preceded by one `Placeholder`. Stale and cancelled loads end without
/// a terminal event.
#[derive(Debug, Clone)]
pub enum ImageEvent {
    /// Show interim content while the fetch runs.
    Placeholder {
        /// Target to apply to.
        target: TargetId,
        /// Identifier being loaded.
        id: ImageId,
        /// The placeholder image.
        image: Arc<image::DynamicImage>,
    },
    /// The load succeeded; apply the image.
    Loaded {
        /// Target to apply to.
        target: TargetId,
        /// Identifier that was loaded.
        id: ImageId,
        /// The final image.
        image: Arc<image::DynamicImage>,
        /// Which tier satisfied the load.
        source: ImageSource,
    },
    /// The load failed; apply the error placeholder if present,
    /// otherwise leave prior content unchanged.
    Failed {
        /// Target the failure belongs to.
        target: TargetId,
        /// Identifier that failed.
        id: ImageId,
        /// What went wrong (never `Cancelled`).
        error: LoadError,
        /// Configured error placeholder, if any.
        placeholder: Option<Arc<image::DynamicImage>>,
    },
}

impl ImageEvent {
    /// The target this event applies to.
    #[must_use]
    pub const fn target(&self) -> TargetId {
        match self {
            Self::Placeholder { target, .. }
            | Self::Loaded { target, .. }
            | Self::Failed { target, .. } => *target,
        }
    }

    /// The identifier this event concerns.
    #[must_use]
    pub const fn id(&self) -> &ImageId {
        match self {
            Self::Placeholder { id, .. } | Self::Loaded { id, .. } | Self::Failed { id, .. } => id,
        }
    }

    /// Returns true for `Loaded` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Loaded { .. } | Self::Failed { .. })
    }
}

struct EngineInner {
    store: Arc<CacheStore>,
    coordinator: FetchCoordinator,
    bindings: BindingTracker,
    /// Active coordinator ticket per target, so `cancel` can detach.
    tickets: Mutex<HashMap<TargetId, (ImageId, WaiterId)>>,
    event_tx: mpsc::UnboundedSender<ImageEvent>,
    config: EngineConfig,
}

/// Process-wide loading engine with explicit lifecycle: construct once
/// at startup, share via clone, call [`ImageEngine::shutdown`] on exit.
///
/// Cloning is cheap; clones share every cache and the in-flight table.
#[derive(Clone)]
pub struct ImageEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for ImageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageEngine")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl ImageEngine {
    /// Creates an engine with the platform HTTP and decode adapters.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built or the disk
    /// cache directory cannot be created.
    pub async fn new(
        config: EngineConfig,
        event_tx: mpsc::UnboundedSender<ImageEvent>,
    ) -> CacheResult<Self> {
        let fetcher: Arc<dyn ImageFetcher> = Arc::new(HttpFetcher::new(
            Duration::from_secs(config.timeout_secs),
            &config.user_agent,
        )?);
        let decoder: Arc<dyn ImageDecoder> = Arc::new(ImageCodec::new(config.max_decode_dimension));

        let disk: Option<Arc<dyn PersistentStore>> = match &config.disk_cache_dir {
            Some(dir) => Some(Arc::new(
                DiskImageCache::new(dir.clone(), config.disk_budget_bytes, config.disk_max_age)
                    .await?,
            )),
            None => None,
        };

        Ok(Self::with_parts(config, fetcher, decoder, disk, event_tx))
    }

    /// Creates an engine with injected collaborators. This is the seam
    /// for alternative backends and for tests.
    #[must_use]
    pub fn with_parts(
        config: EngineConfig,
        fetcher: Arc<dyn ImageFetcher>,
        decoder: Arc<dyn ImageDecoder>,
        disk: Option<Arc<dyn PersistentStore>>,
        event_tx: mpsc::UnboundedSender<ImageEvent>,
    ) -> Self {
        let memory = MemoryImageCache::new(config.memory_budget_bytes, config.memory_entry_ttl);
        let store = Arc::new(CacheStore::new(memory, disk, decoder.clone()));
        let coordinator = FetchCoordinator::new(
            fetcher,
            decoder,
            store.clone(),
            config.max_concurrent_fetches,
            config.fetch_retries,
        );

        info!(
            memory_budget = config.memory_budget_bytes,
            disk = config.disk_cache_dir.is_some(),
            "image engine started"
        );

        Self {
            inner: Arc::new(EngineInner {
                store,
                coordinator,
                bindings: BindingTracker::new(),
                tickets: Mutex::new(HashMap::new()),
                event_tx,
                config,
            }),
        }
    }

    /// Starts a load for `target` and returns immediately. The outcome
    /// arrives as events on the engine's channel: at most one
    /// `Placeholder`, then at most one terminal event. A result whose
    /// target was rebound or released in the meantime is dropped.
    pub fn start_load(&self, target: TargetId, request: ImageRequest) {
        let inner = &self.inner;
        inner.bindings.set_expectation(target, request.id.clone());

        let placeholder = request
            .placeholder
            .clone()
            .or_else(|| inner.config.default_placeholder.clone());
        if let Some(image) = placeholder {
            self.emit(ImageEvent::Placeholder {
                target,
                id: request.id.clone(),
                image,
            });
        }

        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_load(target, request).await;
        });
    }

    async fn run_load(&self, target: TargetId, request: ImageRequest) {
        let ImageRequest { id, options, .. } = request;
        let inner = &self.inner;

        if !options.force_refresh
            && let Some((image, source)) = inner.store.get(&id, &options).await
        {
            if inner.bindings.is_current(target, &id) {
                self.emit(ImageEvent::Loaded {
                    target,
                    id,
                    image,
                    source,
                });
            } else {
                trace!(%target, id = %id, "cache hit for superseded request, dropped");
            }
            return;
        }

        let ticket = inner.coordinator.request(&id, options.priority);
        inner
            .tickets
            .lock()
            .insert(target, (id.clone(), ticket.waiter));

        let outcome = match ticket.receiver.await {
            Ok(outcome) => outcome,
            // Coordinator went away mid-flight; same as cancellation.
            Err(_) => Err(LoadError::Cancelled),
        };

        {
            let mut tickets = inner.tickets.lock();
            if tickets
                .get(&target)
                .is_some_and(|(_, waiter)| *waiter == ticket.waiter)
            {
                tickets.remove(&target);
            }
        }

        if !inner.bindings.is_current(target, &id) {
            debug!(%target, id = %id, "stale completion dropped");
            return;
        }

        match outcome {
            Ok(image) => self.emit(ImageEvent::Loaded {
                target,
                id,
                image,
                source: ImageSource::Network,
            }),
            // Silent: the caller that cancelled already knows.
            Err(LoadError::Cancelled) => {}
            Err(error) => self.emit(ImageEvent::Failed {
                target,
                id,
                error,
                placeholder: inner.config.error_placeholder.clone(),
            }),
        }
    }

    /// Resolves `id` directly, without a display target: memory, then
    /// disk, then a (deduplicated) network fetch.
    ///
    /// # Errors
    /// Returns the fetch failure when no tier can satisfy the id.
    pub async fn resolve(&self, id: &ImageId) -> CacheResult<LoadedImage> {
        if let Some((image, source)) = self.inner.store.get(id, &LoadOptions::default()).await {
            return Ok(LoadedImage {
                id: id.clone(),
                image,
                source,
            });
        }

        let ticket = self.inner.coordinator.request(id, Priority::Normal);
        match ticket.receiver.await {
            Ok(Ok(image)) => Ok(LoadedImage {
                id: id.clone(),
                image,
                source: ImageSource::Network,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(LoadError::Cancelled),
        }
    }

    /// Warms the cache for identifiers likely to be requested soon.
    /// Low priority; results are discarded.
    pub fn start_prefetch(&self, ids: Vec<ImageId>) {
        for id in ids {
            let engine = self.clone();
            tokio::spawn(async move {
                let inner = &engine.inner;
                if inner.store.get(&id, &LoadOptions::default()).await.is_some() {
                    return;
                }
                let ticket = inner.coordinator.request(&id, Priority::Low);
                let _ = ticket.receiver.await;
            });
        }
    }

    /// Detaches `target` from its pending fetch (the shared fetch is
    /// cancelled only when no waiter remains) and clears its binding.
    pub fn cancel_load(&self, target: TargetId) {
        if let Some((id, waiter)) = self.inner.tickets.lock().remove(&target) {
            self.inner.coordinator.detach(&id, waiter);
            debug!(%target, id = %id, "load cancelled");
        }
        self.inner.bindings.clear(target);
    }

    /// Disposal hook: call when a display target is torn down so late
    /// completions are dropped and nothing dangles.
    pub fn release(&self, target: TargetId) {
        self.cancel_load(target);
    }

    /// Invalidates one identifier across both tiers.
    pub async fn invalidate(&self, id: &ImageId) {
        self.inner.store.remove(id).await;
    }

    /// Clears both cache tiers.
    pub async fn clear_caches(&self) {
        self.inner.store.clear().await;
        info!("cleared all image caches");
    }

    /// Memory-tier statistics.
    #[must_use]
    pub fn memory_stats(&self) -> CacheStats {
        self.inner.store.memory_stats()
    }

    /// Combined cache usage in bytes.
    pub async fn cache_size_bytes(&self) -> u64 {
        self.inner.store.current_size_bytes().await
    }

    /// Number of identifiers with a fetch queued or running.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.coordinator.in_flight_count()
    }

    /// Releases in-flight operations and memory-tier entries. Persistent
    /// entries survive for the next session.
    pub async fn shutdown(&self) {
        self.inner.coordinator.cancel_all();
        self.inner.tickets.lock().clear();
        self.inner.bindings.clear_all();
        self.inner.store.clear_memory().await;
        info!("image engine shut down");
    }

    fn emit(&self, event: ImageEvent) {
        if self.inner.event_tx.send(event).is_err() {
            trace!("event receiver dropped, apply event discarded");
        }
    }
}

#[async_trait::async_trait]
impl RemoteImageLoader for ImageEngine {
    fn load(&self, target: TargetId, request: ImageRequest) {
        self.start_load(target, request);
    }

    async fn fetch(&self, id: &ImageId) -> CacheResult<LoadedImage> {
        self.resolve(id).await
    }

    fn prefetch(&self, ids: Vec<ImageId>) {
        self.start_prefetch(ids);
    }

    fn cancel(&self, target: TargetId) {
        self.cancel_load(target);
    }

    fn release_target(&self, target: TargetId) {
        self.release(target);
    }
}
