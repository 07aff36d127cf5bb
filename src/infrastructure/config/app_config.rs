//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::cache_config::{CacheConfig, EncodedFormat};

pub(crate) const APP_NAME: &str = "thumbcache";
pub(crate) const APP_QUALIFIER: &str = "com";
pub(crate) const APP_ORGANIZATION: &str = "thumbcache";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Configuration of the command line front end.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log file path. Logs go to stderr when unset.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
}

use super::args::CliArgs;

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache.cache_dir = Some(cache_dir.clone());
        }
        if let Some(disk_cache_size) = args.disk_cache_size {
            self.cache.disk_cache_size = disk_cache_size;
        }
        if let Some(quality) = args.quality {
            self.cache.encoding = EncodedFormat::Jpeg { quality };
        }
        if let Some(width) = args.width {
            self.cache.target_width = width;
        }
        if let Some(height) = args.height {
            self.cache.target_height = height;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_config_with_cache_section() {
        let toml_content = r#"
            log_level = "debug"

            [cache]
            disk_cache_size = 1048576
            target_width = 64

            [cache.encoding]
            codec = "jpeg"
            quality = 85
        "#;

        let config: AppConfig = toml::from_str(toml_content).expect("Failed to parse config");

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.cache.disk_cache_size, 1_048_576);
        assert_eq!(config.cache.target_width, 64);
        assert_eq!(config.cache.target_height, 100);
        assert_eq!(config.cache.encoding, EncodedFormat::Jpeg { quality: 85 });
    }

    #[test]
    fn test_args_override_file_values() {
        let mut config = AppConfig::default();
        let args = CliArgs::parse_from([
            "thumbcache",
            "--log-level",
            "warn",
            "--quality",
            "50",
            "--width",
            "32",
            "stats",
        ]);

        config.merge_with_args(&args);

        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.cache.encoding, EncodedFormat::Jpeg { quality: 50 });
        assert_eq!(config.cache.target_width, 32);
        assert_eq!(config.cache.target_height, 100);
    }
}
