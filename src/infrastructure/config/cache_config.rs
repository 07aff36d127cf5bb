//! Cache tuning knobs.

use std::path::{Component, Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::ports::{CacheError, CacheResult, DiskStoreOptions};

use super::app_config::{APP_NAME, APP_ORGANIZATION, APP_QUALIFIER};

/// Blob slots stored per key. Each key holds exactly one encoded image.
pub const SLOTS_PER_KEY: usize = 1;

/// Codec used for blobs written to the disk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "codec", rename_all = "lowercase")]
pub enum EncodedFormat {
    /// Lossy JPEG at the given quality (1-100).
    Jpeg {
        /// Encoder quality.
        #[serde(default = "default_quality")]
        quality: u8,
    },
    /// Lossless PNG.
    Png,
}

impl Default for EncodedFormat {
    fn default() -> Self {
        Self::Jpeg {
            quality: default_quality(),
        }
    }
}

impl std::fmt::Display for EncodedFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jpeg { quality } => write!(f, "jpeg (quality {quality})"),
            Self::Png => write!(f, "png"),
        }
    }
}

/// Immutable configuration for a `CacheCoordinator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Memory tier gets `1 / memory_divisor` of the memory budget.
    #[serde(default = "default_memory_divisor")]
    pub memory_divisor: u32,

    /// Memory budget in bytes. Queried from the system when unset.
    #[serde(default)]
    pub memory_budget_bytes: Option<u64>,

    /// Disk tier byte budget.
    #[serde(default = "default_disk_cache_size")]
    pub disk_cache_size: u64,

    /// Root directory for the disk tier. Platform cache dir when unset.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Subdirectory of the cache root owned by the disk store.
    #[serde(default = "default_subdir")]
    pub subdir: String,

    /// Disk format version. Bumping it discards every stored record.
    #[serde(default = "default_format_version")]
    pub format_version: u32,

    /// Codec for disk blobs.
    #[serde(default)]
    pub encoding: EncodedFormat,

    /// Buffer size for blob and journal I/O.
    #[serde(default = "default_io_buffer_size")]
    pub io_buffer_size: usize,

    /// Default bounding box width for decodes.
    #[serde(default = "default_target_size")]
    pub target_width: u32,

    /// Default bounding box height for decodes.
    #[serde(default = "default_target_size")]
    pub target_height: u32,

    /// Maximum concurrently running miss paths.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

const fn default_memory_divisor() -> u32 {
    8
}

const fn default_disk_cache_size() -> u64 {
    10 * 1024 * 1024
}

fn default_subdir() -> String {
    "thumbnails".to_string()
}

const fn default_format_version() -> u32 {
    1
}

const fn default_quality() -> u8 {
    70
}

const fn default_io_buffer_size() -> usize {
    4 * 1024
}

const fn default_target_size() -> u32 {
    100
}

const fn default_max_workers() -> usize {
    4
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_divisor: default_memory_divisor(),
            memory_budget_bytes: None,
            disk_cache_size: default_disk_cache_size(),
            cache_dir: None,
            subdir: default_subdir(),
            format_version: default_format_version(),
            encoding: EncodedFormat::default(),
            io_buffer_size: default_io_buffer_size(),
            target_width: default_target_size(),
            target_height: default_target_size(),
            max_workers: default_max_workers(),
        }
    }
}

impl CacheConfig {
    /// Memory tier capacity in KB.
    #[must_use]
    pub fn memory_capacity_kb(&self) -> usize {
        let budget = self.memory_budget_bytes.unwrap_or_else(available_memory_bytes);
        let kb = budget / 1024 / u64::from(self.memory_divisor.max(1));
        usize::try_from(kb).unwrap_or(usize::MAX)
    }

    /// Directory the disk store lives in.
    ///
    /// Prefers the configured root, then the platform user cache directory,
    /// then the process temp directory.
    ///
    /// # Errors
    /// Returns error if `subdir` is empty, absolute or leaves the root.
    pub fn resolve_cache_dir(&self) -> CacheResult<PathBuf> {
        let subdir = Path::new(&self.subdir);
        let confined = !self.subdir.is_empty()
            && subdir
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !confined {
            return Err(CacheError::InvalidSubdir {
                subdir: self.subdir.clone(),
            });
        }

        let root = self.cache_dir.clone().unwrap_or_else(|| {
            ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME).map_or_else(
                || std::env::temp_dir().join(APP_NAME).join("cache"),
                |dirs| dirs.cache_dir().to_path_buf(),
            )
        });
        Ok(root.join(subdir))
    }

    /// Options the disk store is opened with.
    ///
    /// # Errors
    /// Returns error if the store directory cannot be resolved.
    pub fn disk_store_options(&self) -> CacheResult<DiskStoreOptions> {
        Ok(DiskStoreOptions {
            dir: self.resolve_cache_dir()?,
            version: self.format_version,
            slots_per_key: SLOTS_PER_KEY,
            max_bytes: self.disk_cache_size,
            io_buffer_size: self.io_buffer_size.max(1),
        })
    }
}

/// Memory available to the process, as reported by the OS.
fn available_memory_bytes() -> u64 {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    let available = sys.available_memory();
    let budget = if available > 0 {
        available
    } else {
        sys.total_memory()
    };
    debug!(budget, "Queried system memory budget");
    budget
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.memory_divisor, 8);
        assert_eq!(config.disk_cache_size, 10 * 1024 * 1024);
        assert_eq!(config.subdir, "thumbnails");
        assert_eq!(config.encoding, EncodedFormat::Jpeg { quality: 70 });
        assert_eq!(config.io_buffer_size, 4096);
    }

    #[test]
    fn test_memory_capacity_from_budget() {
        let config = CacheConfig {
            memory_budget_bytes: Some(64 * 1024 * 1024),
            ..CacheConfig::default()
        };
        assert_eq!(config.memory_capacity_kb(), 8 * 1024);
    }

    #[test]
    fn test_memory_capacity_from_system() {
        assert!(CacheConfig::default().memory_capacity_kb() > 0);
    }

    #[test]
    fn test_resolve_cache_dir_appends_subdir() {
        let config = CacheConfig {
            cache_dir: Some(PathBuf::from("/var/tmp/app")),
            ..CacheConfig::default()
        };
        assert_eq!(
            config.resolve_cache_dir().unwrap(),
            PathBuf::from("/var/tmp/app/thumbnails")
        );
        assert!(
            CacheConfig::default()
                .resolve_cache_dir()
                .unwrap()
                .ends_with("thumbnails")
        );
    }

    #[test_case("" ; "empty")]
    #[test_case("/etc" ; "absolute")]
    #[test_case("../photos" ; "parent")]
    #[test_case("thumbs/../.." ; "nested_parent")]
    #[test_case("." ; "current_dir")]
    fn test_subdir_must_stay_inside_root(subdir: &str) {
        let config = CacheConfig {
            cache_dir: Some(PathBuf::from("/var/tmp/app")),
            subdir: subdir.to_string(),
            ..CacheConfig::default()
        };

        assert!(matches!(
            config.disk_store_options(),
            Err(CacheError::InvalidSubdir { .. })
        ));
    }

    #[test]
    fn test_nested_subdir_allowed() {
        let config = CacheConfig {
            cache_dir: Some(PathBuf::from("/var/tmp/app")),
            subdir: "images/thumbs".to_string(),
            ..CacheConfig::default()
        };
        assert_eq!(
            config.disk_store_options().unwrap().dir,
            PathBuf::from("/var/tmp/app/images/thumbs")
        );
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_content = r#"
            disk_cache_size = 2048
            subdir = "thumbs"

            [encoding]
            codec = "png"
        "#;

        let config: CacheConfig = toml::from_str(toml_content).expect("Failed to parse config");

        assert_eq!(config.disk_cache_size, 2048);
        assert_eq!(config.subdir, "thumbs");
        assert_eq!(config.encoding, EncodedFormat::Png);
        assert_eq!(config.format_version, 1);
    }

    #[test]
    fn test_parse_jpeg_default_quality() {
        let config: CacheConfig =
            toml::from_str("[encoding]\ncodec = \"jpeg\"\n").expect("Failed to parse config");
        assert_eq!(config.encoding, EncodedFormat::Jpeg { quality: 70 });
    }
}
