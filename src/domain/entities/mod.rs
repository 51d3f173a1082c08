//! Domain entities: image identity, load requests, target handles.

mod image;
mod request;
mod target;

pub use image::{ImageId, ImageSource, LoadedImage};
pub use request::{ImageRequest, LoadOptions, Priority};
pub use target::TargetId;
