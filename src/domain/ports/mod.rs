mod disk_store_port;
mod image_cache_port;

pub use disk_store_port::{DiskEditor, DiskSnapshot, DiskStore, DiskStoreOptions};
pub use image_cache_port::{CacheError, CacheResult, CacheStats, ImageCachePort};
