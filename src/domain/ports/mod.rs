//! Port definitions for external collaborators.

mod fetch_port;
mod loader_port;
mod persistence_port;

pub use fetch_port::{ImageDecoder, ImageFetcher};
pub use loader_port::RemoteImageLoader;
pub use persistence_port::PersistentStore;
