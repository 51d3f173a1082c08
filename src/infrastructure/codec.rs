//! Decode adapter over the image crate.

use crate::domain::errors::{CacheResult, LoadError};
use crate::domain::ports::ImageDecoder;

/// Decoder for the decode port, with an optional dimension cap.
///
/// Callers run [`ImageDecoder::decode`] on a blocking pool; decoding and
/// downscaling are CPU-bound.
#[derive(Debug, Clone, Default)]
pub struct ImageCodec {
    max_dimension: Option<u32>,
}

impl ImageCodec {
    /// Creates a codec that downscales any image wider or taller than
    /// `max_dimension`, preserving aspect ratio. `None` keeps originals.
    #[must_use]
    pub const fn new(max_dimension: Option<u32>) -> Self {
        Self { max_dimension }
    }
}

impl ImageDecoder for ImageCodec {
    fn decode(&self, bytes: &[u8]) -> CacheResult<image::DynamicImage> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| LoadError::decode(format!("failed to decode image: {e}")))?;

        if let Some(max) = self.max_dimension
            && (decoded.width() > max || decoded.height() > max)
        {
            return Ok(decoded.resize(max, max, image::imageops::FilterType::Lanczos3));
        }

        Ok(decoded)
    }
}
