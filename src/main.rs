use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{Result, bail};
use tokio::runtime::Handle;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use thumbcache::domain::{CacheKey, LoadedImage, SourceDescriptor};
use thumbcache::infrastructure::{
    AppConfig, CacheConfig, CacheCoordinator, CliArgs, Command, StorageManager, TaskRunner,
};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = &config.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let manager = StorageManager::new()?;
    let mut config = manager.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

fn report(path: &str, loaded: Option<&LoadedImage>) {
    match loaded {
        Some(loaded) => println!(
            "{path}: {}x{} ({}, {} KB)",
            loaded.image.width(),
            loaded.image.height(),
            loaded.origin,
            loaded.image.footprint_kb()
        ),
        None => println!("{path}: not a readable image"),
    }
}

async fn fetch(config: CacheConfig, paths: Vec<PathBuf>, memory_only: bool) -> Result<()> {
    let (runner, mut queue) = TaskRunner::new(Handle::current(), config.max_workers);
    let coordinator: CacheCoordinator = if memory_only {
        CacheCoordinator::memory_only(config, runner)
    } else {
        CacheCoordinator::new(config, runner)
    };

    let mut pending = 0_usize;
    for path in paths {
        let shown = path.display().to_string();
        let key = CacheKey::from_source_path(&path.to_string_lossy());
        let source = SourceDescriptor::path(path);
        let scheduled = coordinator.request_default(key, source, move |loaded| {
            report(&shown, loaded.as_ref());
        });
        if scheduled.is_some() {
            pending += 1;
        }
    }
    while pending > 0 && queue.next().await {
        pending -= 1;
    }

    coordinator.flush().await?;
    println!("{}", coordinator.memory_stats());
    if let Some(usage) = coordinator.disk_usage().await {
        println!("{usage}");
    }
    Ok(())
}

async fn stats(config: CacheConfig) -> Result<()> {
    let dir = config.resolve_cache_dir()?;
    let (runner, _queue) = TaskRunner::new(Handle::current(), config.max_workers);
    let coordinator: CacheCoordinator = CacheCoordinator::new(config, runner);

    match coordinator.disk_usage().await {
        Some(usage) => {
            println!("{}", dir.display());
            println!("{usage}");
            Ok(())
        }
        None => bail!("disk cache at {} could not be opened", dir.display()),
    }
}

async fn clear(config: CacheConfig) -> Result<()> {
    let dir = config.resolve_cache_dir()?;
    let (runner, _queue) = TaskRunner::new(Handle::current(), config.max_workers);
    let coordinator: CacheCoordinator = CacheCoordinator::new(config, runner);

    coordinator.clear_disk().await?;
    println!("Cleared {}", dir.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = thumbcache::VERSION, "Starting {}", thumbcache::NAME);

    match args.command {
        Command::Fetch { paths, memory_only } => fetch(config.cache, paths, memory_only).await,
        Command::Stats => stats(config.cache).await,
        Command::Clear => clear(config.cache).await,
    }
}
