//! Infrastructure layer with the cache tiers and configuration.

/// Application configuration.
pub mod config;
/// Image cache tiers, decoder and coordinator.
pub mod image;

pub use config::{
    AppConfig, CacheConfig, CliArgs, Command, EncodedFormat, LogLevel, StorageManager,
};
pub use image::{
    CacheCoordinator, DeliveryQueue, DiskUsage, JournalDiskStore, MemoryImageCache,
    SampledDecoder, TaskRunner,
};
