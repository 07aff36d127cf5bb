//! Application and cache configuration.

/// Application-level settings.
pub mod app_config;
/// Command line arguments.
pub mod args;
/// Cache tier settings.
pub mod cache_config;
/// Config file persistence.
pub mod storage;

pub use app_config::{AppConfig, LogLevel};
pub use args::{CliArgs, Command};
pub use cache_config::{CacheConfig, EncodedFormat, SLOTS_PER_KEY};
pub use storage::{ConfigError, StorageManager};
