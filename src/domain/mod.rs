//! Domain layer with cache entities and port definitions.

/// Entity definitions.
pub mod entities;
/// Port definitions.
pub mod ports;

pub use entities::{CacheKey, DecodedImage, LoadOrigin, LoadedImage, SourceDescriptor};
pub use ports::{CacheError, CacheResult, DiskStore, ImageCachePort};
