//! Domain types for cached images.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;

/// Unique identifier for one logical image.
///
/// Identical sources map to identical keys. A key is never reused for different
/// content without a version bump of the disk store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Creates a new `CacheKey` from any string-like input.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Creates a file-safe `CacheKey` by hashing a source path or URL.
    #[must_use]
    pub fn from_source_path(path: &str) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(path.as_bytes());
        let result = hasher.finalize();
        Self(hex::encode(&result[..16]))
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A decoded pixel buffer held by the memory tier.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pixels: image::DynamicImage,
}

impl DecodedImage {
    /// Wraps a decoded image.
    #[must_use]
    pub const fn new(pixels: image::DynamicImage) -> Self {
        Self { pixels }
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Size of the decoded pixel buffer in bytes.
    #[must_use]
    pub fn byte_count(&self) -> usize {
        self.pixels.as_bytes().len()
    }

    /// Footprint used for memory accounting, in whole kilobytes (rounded down).
    #[must_use]
    pub fn footprint_kb(&self) -> usize {
        self.byte_count() / 1024
    }

    /// Borrows the underlying image.
    #[must_use]
    pub const fn as_dynamic(&self) -> &image::DynamicImage {
        &self.pixels
    }
}

impl From<image::DynamicImage> for DecodedImage {
    fn from(pixels: image::DynamicImage) -> Self {
        Self::new(pixels)
    }
}

/// Where the raw, encoded form of an image can be read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// An encoded image file on the local filesystem.
    Path(PathBuf),
    /// An encoded image already held in memory.
    Bytes(Bytes),
}

impl SourceDescriptor {
    /// Creates a descriptor for a file.
    #[must_use]
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    /// Creates a descriptor for in-memory encoded bytes.
    #[must_use]
    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl std::fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

/// Which tier produced an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    /// Served from the in-memory LRU cache.
    Memory,
    /// Read back from the disk store.
    Disk,
    /// Decoded from the source descriptor.
    Decoded,
}

impl std::fmt::Display for LoadOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Disk => write!(f, "disk"),
            Self::Decoded => write!(f, "decoded"),
        }
    }
}

/// An image handed back to a caller.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// The key the image was requested under.
    pub key: CacheKey,
    /// The decoded image.
    pub image: Arc<DecodedImage>,
    /// Where it came from.
    pub origin: LoadOrigin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_source_path() {
        let key = CacheKey::from_source_path("/photos/holiday/IMG_0001.jpg");
        assert_eq!(key.as_str().len(), 32);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_consistency() {
        let path = "/photos/holiday/IMG_0001.jpg";
        assert_eq!(
            CacheKey::from_source_path(path),
            CacheKey::from_source_path(path)
        );
        assert_ne!(
            CacheKey::from_source_path(path),
            CacheKey::from_source_path("/photos/holiday/IMG_0002.jpg")
        );
    }

    #[test]
    fn test_footprint_rounds_down() {
        // 20x20 RGBA = 1600 bytes
        let img = DecodedImage::new(image::DynamicImage::new_rgba8(20, 20));
        assert_eq!(img.byte_count(), 1600);
        assert_eq!(img.footprint_kb(), 1);

        let tiny = DecodedImage::new(image::DynamicImage::new_rgb8(10, 10));
        assert_eq!(tiny.footprint_kb(), 0);
    }
}
