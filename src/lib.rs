//! Thumbcache - a two-tier image cache.
//!
//! Decoded thumbnails are kept in a footprint-bounded memory LRU backed by a
//! journaled, size-bounded disk store. Misses are decoded from the source,
//! downsampled by a power of two to fit a target bounding box.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities and port definitions.
pub mod domain;
/// Infrastructure layer containing the cache tiers and configuration.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "thumbcache";
