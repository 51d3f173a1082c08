//! webimage - an asynchronous remote-image loading and caching engine.
//!
//! Given an identifier ("load the image at this URL into this display
//! target"), the engine resolves it from a two-tier cache or a
//! deduplicated network fetch, and delivers the result back on an event
//! channel after checking the target still wants it. Reuse, cancellation,
//! and concurrent requests are all safe by construction.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing the engine, coordinator, and tracker.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for external services.
pub mod infrastructure;

pub use application::{EngineConfig, ImageEngine, ImageEvent};
pub use domain::entities::{
    ImageId, ImageRequest, ImageSource, LoadOptions, LoadedImage, Priority, TargetId,
};
pub use domain::errors::{CacheResult, LoadError};
pub use domain::ports::RemoteImageLoader;

/// Current version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = "webimage";
