//! Image cache infrastructure.
//!
//! This module provides:
//! - Bounded, downsampled decoding of image sources
//! - Memory caching with footprint-weighted LRU eviction
//! - A journaled, size-bounded disk store
//! - A coordinator tying both tiers to a bounded task runner

pub mod coordinator;
pub mod decoder;
pub mod disk_store;
pub mod init_gate;
pub mod memory_cache;
pub mod task_runner;

pub use coordinator::{CacheCoordinator, DiskUsage};
pub use decoder::{SampledDecoder, calculate_downsample, decode_blob, encode_blob};
pub use disk_store::{JournalDiskStore, JournalEditor, JournalSnapshot};
pub use init_gate::{GateState, InitGate};
pub use memory_cache::{MemoryImageCache, SizeFn};
pub use task_runner::{DeliveryQueue, TaskHandle, TaskRunner};
