//! Port for the loading facade.

use crate::domain::entities::{ImageId, ImageRequest, LoadedImage, TargetId};
use crate::domain::errors::CacheResult;

/// The load contract UI code depends on.
///
/// Call sites hold this abstraction rather than a concrete engine, so
/// the backend can be swapped without touching them. Results for `load`
/// are delivered on the apply channel the implementation was built
/// with, after the staleness check against the target's current binding.
#[async_trait::async_trait]
pub trait RemoteImageLoader: Send + Sync {
    /// Starts a load for `target`. Returns immediately; the outcome
    /// arrives as an event on the apply channel.
    fn load(&self, target: TargetId, request: ImageRequest);

    /// Resolves an identifier directly (cache, then network), without a
    /// display target.
    ///
    /// # Errors
    /// Returns the fetch failure if no tier can satisfy the identifier.
    async fn fetch(&self, id: &ImageId) -> CacheResult<LoadedImage>;

    /// Warms the cache for identifiers likely to be requested soon.
    fn prefetch(&self, ids: Vec<ImageId>);

    /// Detaches `target` from any pending fetch and clears its binding.
    /// The shared fetch is cancelled only if no other waiter remains.
    fn cancel(&self, target: TargetId);

    /// Disposal hook: call when the display target is torn down.
    fn release_target(&self, target: TargetId);
}
