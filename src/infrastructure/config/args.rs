//! Command line arguments.

use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "thumbcache",
    version,
    about = "Two-tier (memory + disk) thumbnail cache",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Cache root directory.
    #[arg(long, value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Disk cache budget in bytes.
    #[arg(long, global = true)]
    pub disk_cache_size: Option<u64>,

    /// JPEG quality for disk blobs.
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100), global = true)]
    pub quality: Option<u8>,

    /// Target thumbnail width.
    #[arg(long, global = true)]
    pub width: Option<u32>,

    /// Target thumbnail height.
    #[arg(long, global = true)]
    pub height: Option<u32>,

    /// Action to run.
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load thumbnails for the given image files through the cache.
    Fetch {
        /// Image files to load.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Skip the disk tier.
        #[arg(long)]
        memory_only: bool,
    },
    /// Show disk tier occupancy.
    Stats,
    /// Remove every record from the disk tier.
    Clear,
}
