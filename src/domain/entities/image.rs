//! Core image identity and result types.

use std::sync::Arc;

/// Normalized identifier for one logical image source.
///
/// Wraps a canonicalized URL plus an optional variant string (transform
/// parameters such as a thumbnail size). Immutable once constructed; the
/// cache key is a truncated SHA-256 digest of the canonical URL and
/// variant, computed up front so cache and dedup lookups stay cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageId {
    url: String,
    variant: Option<String>,
    key: String,
}

impl ImageId {
    /// Creates an identifier from a URL, canonicalizing it first.
    #[must_use]
    pub fn new(url: &str) -> Self {
        Self::with_variant(url, None)
    }

    /// Creates an identifier with a variant qualifier.
    ///
    /// Two requests for the same URL with different variants are distinct
    /// cache entries and distinct fetches.
    #[must_use]
    pub fn with_variant(url: &str, variant: Option<&str>) -> Self {
        let url = canonicalize_url(url);
        let variant = variant.map(String::from);
        let key = compute_key(&url, variant.as_deref());
        Self { url, variant, key }
    }

    /// Returns the canonical URL this identifier resolves to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the variant qualifier, if any.
    #[must_use]
    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    /// Returns the stable cache key (32 hex chars) for this identifier.
    #[must_use]
    pub fn cache_key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.variant {
            Some(v) => write!(f, "{}#{v}", self.url),
            None => write!(f, "{}", self.url),
        }
    }
}

impl From<&str> for ImageId {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

/// Canonicalizes a URL: trims whitespace, strips the fragment, and
/// lowercases the scheme and host so equivalent spellings share a key.
fn canonicalize_url(url: &str) -> String {
    let url = url.trim();
    let url = url.split('#').next().unwrap_or(url);

    if let Some(scheme_end) = url.find("://") {
        let authority_start = scheme_end + 3;
        let host_end = url[authority_start..]
            .find('/')
            .map_or(url.len(), |i| authority_start + i);

        let mut out = String::with_capacity(url.len());
        out.push_str(&url[..host_end].to_ascii_lowercase());
        out.push_str(&url[host_end..]);
        out
    } else {
        url.to_string()
    }
}

fn compute_key(url: &str, variant: Option<&str>) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    if let Some(v) = variant {
        hasher.update([0u8]);
        hasher.update(v.as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Where a loaded image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Decoded image was already in the memory tier.
    MemoryCache,
    /// Bytes were read from the persistent tier and decoded.
    DiskCache,
    /// Bytes were fetched over the network.
    Network,
}

/// A successfully loaded image together with its provenance.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// The identifier that was loaded.
    pub id: ImageId,
    /// The decoded image, shared without copying pixel data.
    pub image: Arc<image::DynamicImage>,
    /// Which tier satisfied the load.
    pub source: ImageSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalization_lowercases_scheme_and_host_only() {
        let id = ImageId::new("HTTPS://Example.COM/Path/IMG.png");
        assert_eq!(id.url(), "https://example.com/Path/IMG.png");
    }

    #[test]
    fn canonicalization_strips_fragment_and_whitespace() {
        let id = ImageId::new("  https://example.com/a.png#frag  ");
        assert_eq!(id.url(), "https://example.com/a.png");
    }

    #[test]
    fn equivalent_spellings_share_a_key() {
        let a = ImageId::new("https://example.com/a.png");
        let b = ImageId::new("HTTPS://EXAMPLE.com/a.png#top");
        assert_eq!(a, b);
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn variant_changes_the_key() {
        let plain = ImageId::new("https://example.com/a.png");
        let thumb = ImageId::with_variant("https://example.com/a.png", Some("64x64"));
        assert_ne!(plain, thumb);
        assert_ne!(plain.cache_key(), thumb.cache_key());
    }

    #[test]
    fn key_is_stable_hex() {
        let id = ImageId::new("img://A");
        assert_eq!(id.cache_key().len(), 32);
        assert_eq!(id.cache_key(), ImageId::new("img://A").cache_key());
        assert!(id.cache_key().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
