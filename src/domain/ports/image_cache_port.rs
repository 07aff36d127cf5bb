//! Port definition for the in-memory image tier.

use std::sync::Arc;

use crate::domain::entities::{CacheKey, DecodedImage};

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur inside the cache tiers.
///
/// None of these reach a caller of `CacheCoordinator::request`; they are
/// logged and absorbed there.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Key cannot be used by the disk store.
    #[error("invalid cache key {key:?}: must match [a-z0-9_-]{{1,120}}")]
    InvalidKey {
        /// The rejected key.
        key: String,
    },
    /// Failed to decode image data.
    #[error("decode error: {0}")]
    Decode(String),
    /// Failed to encode image data.
    #[error("encode error: {0}")]
    Encode(String),
    /// Journal is corrupt or was written by another format.
    #[error("journal error: {0}")]
    Journal(String),
    /// Slot index out of range for the store's configured slot count.
    #[error("slot {slot} out of range (store has {slots} slots)")]
    SlotOutOfRange {
        /// Requested slot.
        slot: usize,
        /// Configured slots per key.
        slots: usize,
    },
    /// A new entry was committed without writing every slot.
    #[error("commit of {key:?} is missing slot {slot}")]
    IncompleteEdit {
        /// Key being committed.
        key: String,
        /// First slot without data.
        slot: usize,
    },
    /// Configured store subdirectory would leave the cache root.
    #[error("invalid cache subdirectory {subdir:?}: must stay inside the cache root")]
    InvalidSubdir {
        /// The rejected subdirectory.
        subdir: String,
    },
    /// Disk tier could not be opened.
    #[error("disk tier unavailable: {0}")]
    Unavailable(String),
    /// I/O error during cache operation.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Creates a journal error.
    #[must_use]
    pub fn journal(message: impl Into<String>) -> Self {
        Self::Journal(message.into())
    }

    /// Maps a codec error raised while writing an image.
    #[must_use]
    pub fn encoding(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) => Self::Io(io),
            other => Self::Encode(other.to_string()),
        }
    }
}

/// Codec errors raised while reading an image.
impl From<image::ImageError> for CacheError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) => Self::Io(io),
            other => Self::Decode(other.to_string()),
        }
    }
}

/// Hit/miss counters and occupancy of a memory tier.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Combined footprint of resident images, in KB.
    pub footprint_kb: usize,
    /// Configured capacity, in KB.
    pub capacity_kb: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {}/{} KB, {:.1}% hit rate ({} hits, {} misses)",
            self.size,
            self.footprint_kb,
            self.capacity_kb,
            self.hit_rate,
            self.hits,
            self.misses
        )
    }
}

/// Port for the memory tier.
/// Implementations must be thread-safe and must not block on I/O.
pub trait ImageCachePort: Send + Sync {
    /// Gets an image and marks it most recently used.
    fn get(&self, key: &CacheKey) -> Option<Arc<DecodedImage>>;

    /// Looks at an image without touching recency or counters.
    fn peek(&self, key: &CacheKey) -> Option<Arc<DecodedImage>>;

    /// Stores an image unless the key is already present.
    /// Returns true if the image was inserted.
    fn put(&self, key: CacheKey, image: Arc<DecodedImage>) -> bool;

    /// Removes an image from the cache.
    fn evict(&self, key: &CacheKey) -> bool;

    /// Returns the current number of cached images.
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all images from the cache.
    fn clear(&self);

    /// Returns a snapshot of the cache counters.
    fn stats(&self) -> CacheStats;
}
