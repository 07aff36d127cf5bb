//! Domain entity definitions.

mod image;

pub use image::{CacheKey, DecodedImage, LoadOrigin, LoadedImage, SourceDescriptor};
