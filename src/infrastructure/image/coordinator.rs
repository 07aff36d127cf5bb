//! Two-tier image cache front end.
//!
//! A request is answered from the memory tier when possible. Misses run on
//! the [`TaskRunner`]: they wait for the disk tier to finish opening, try the
//! disk store, fall back to a bounded decode of the source, populate whichever
//! tiers lack the image and hand the result back through the caller's
//! [`DeliveryQueue`](super::DeliveryQueue).

use std::io::{BufReader, BufWriter, Write};
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use super::decoder::{SampledDecoder, decode_blob, encode_blob};
use super::disk_store::JournalDiskStore;
use super::init_gate::{GateState, InitGate};
use super::memory_cache::MemoryImageCache;
use super::task_runner::{TaskHandle, TaskRunner};
use crate::domain::entities::{CacheKey, DecodedImage, LoadOrigin, LoadedImage, SourceDescriptor};
use crate::domain::ports::{
    CacheError, CacheResult, CacheStats, DiskEditor, DiskSnapshot, DiskStore, ImageCachePort,
};
use crate::infrastructure::config::{CacheConfig, EncodedFormat};

/// Occupancy of the disk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    /// Committed records.
    pub entries: usize,
    /// Occupied bytes.
    pub size: u64,
    /// Byte budget.
    pub max_size: u64,
}

impl std::fmt::Display for DiskUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Disk: {} records, {}/{} bytes",
            self.entries, self.size, self.max_size
        )
    }
}

/// Coordinates the memory tier, the disk tier and the decoder.
pub struct CacheCoordinator<S: DiskStore = JournalDiskStore> {
    config: Arc<CacheConfig>,
    memory: Arc<dyn ImageCachePort>,
    disk: Arc<InitGate<S>>,
    decoder: SampledDecoder,
    runner: TaskRunner,
}

impl<S: DiskStore> std::fmt::Debug for CacheCoordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let disk = match self.disk.state() {
            GateState::Starting => "starting",
            GateState::Ready(_) => "ready",
            GateState::Unavailable => "unavailable",
        };
        f.debug_struct("CacheCoordinator")
            .field("memory", &self.memory.stats())
            .field("disk", &disk)
            .field("encoding", &self.config.encoding)
            .finish_non_exhaustive()
    }
}

impl<S: DiskStore> CacheCoordinator<S> {
    /// Creates a coordinator and starts opening the disk tier in the background.
    ///
    /// Requests made before the disk tier is open wait for it on the runner;
    /// if opening fails the coordinator keeps working from memory and decodes.
    #[must_use]
    pub fn new(config: CacheConfig, runner: TaskRunner) -> Self {
        let gate = Arc::new(InitGate::new());

        match config.disk_store_options() {
            Ok(options) => {
                let opening = Arc::clone(&gate);
                runner.run_blocking(move || match S::open(&options) {
                    Ok(store) => {
                        info!(dir = %options.dir.display(), "Disk tier ready");
                        opening.resolve(Some(store));
                    }
                    Err(e) => {
                        warn!(
                            dir = %options.dir.display(),
                            error = %e,
                            "Disk tier unavailable, continuing without it"
                        );
                        opening.resolve(None);
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "Disk tier disabled, continuing without it");
                gate.resolve(None);
            }
        }

        Self::with_gate(config, runner, gate)
    }

    /// Creates a coordinator without a disk tier.
    #[must_use]
    pub fn memory_only(config: CacheConfig, runner: TaskRunner) -> Self {
        Self::with_gate(config, runner, Arc::new(InitGate::unavailable()))
    }

    /// Creates a coordinator over an already opened disk store.
    #[must_use]
    pub fn with_store(config: CacheConfig, runner: TaskRunner, store: S) -> Self {
        Self::with_gate(config, runner, Arc::new(InitGate::ready(store)))
    }

    /// Creates a coordinator whose disk tier is resolved through `gate` by
    /// someone else.
    #[must_use]
    pub fn with_gate(config: CacheConfig, runner: TaskRunner, gate: Arc<InitGate<S>>) -> Self {
        let memory = Arc::new(MemoryImageCache::new(config.memory_capacity_kb()));
        debug!(capacity_kb = memory.capacity(), "Memory tier sized");
        Self {
            config: Arc::new(config),
            memory,
            disk: gate,
            decoder: SampledDecoder::new(),
            runner,
        }
    }

    /// Requests `key`, decoding `source` into a `target_width` x
    /// `target_height` bounding box on a miss.
    ///
    /// On a memory hit `on_ready` runs before this returns and `None` is
    /// returned. Otherwise the miss path is submitted to the runner and
    /// `on_ready` runs later from the caller's delivery queue; a source that
    /// cannot be decoded is delivered as `None`.
    pub fn request<F>(
        &self,
        key: CacheKey,
        source: SourceDescriptor,
        target_width: u32,
        target_height: u32,
        on_ready: F,
    ) -> Option<TaskHandle>
    where
        F: FnOnce(Option<LoadedImage>) + Send + 'static,
    {
        if let Some(image) = self.memory.get(&key) {
            trace!(key = %key, "Memory hit");
            on_ready(Some(LoadedImage {
                key,
                image,
                origin: LoadOrigin::Memory,
            }));
            return None;
        }

        trace!(key = %key, "Memory miss, scheduling load");
        let miss = self.miss_path(key, source, target_width, target_height);
        Some(self.runner.submit(miss.run(), on_ready))
    }

    /// [`request`](Self::request) with the configured default bounding box.
    pub fn request_default<F>(
        &self,
        key: CacheKey,
        source: SourceDescriptor,
        on_ready: F,
    ) -> Option<TaskHandle>
    where
        F: FnOnce(Option<LoadedImage>) + Send + 'static,
    {
        let (width, height) = (self.config.target_width, self.config.target_height);
        self.request(key, source, width, height, on_ready)
    }

    /// Loads `key` inline, following the same path as
    /// [`request`](Self::request) without the runner.
    pub async fn load(
        &self,
        key: CacheKey,
        source: SourceDescriptor,
        target_width: u32,
        target_height: u32,
    ) -> Option<LoadedImage> {
        if let Some(image) = self.memory.get(&key) {
            return Some(LoadedImage {
                key,
                image,
                origin: LoadOrigin::Memory,
            });
        }
        self.miss_path(key, source, target_width, target_height)
            .run()
            .await
    }

    /// Looks at the memory tier without loading or touching recency.
    #[must_use]
    pub fn peek_memory(&self, key: &CacheKey) -> Option<Arc<DecodedImage>> {
        self.memory.peek(key)
    }

    /// Counters of the memory tier.
    #[must_use]
    pub fn memory_stats(&self) -> CacheStats {
        self.memory.stats()
    }

    /// Drops every image from the memory tier.
    pub fn clear_memory(&self) {
        self.memory.clear();
    }

    /// Waits for the disk tier to open. Returns false if it is unavailable.
    pub async fn wait_for_disk(&self) -> bool {
        self.disk.wait().await.is_some()
    }

    /// Occupancy of the disk tier once it is open.
    pub async fn disk_usage(&self) -> Option<DiskUsage> {
        let store = self.disk.wait().await?;
        Some(DiskUsage {
            entries: store.len(),
            size: store.size(),
            max_size: store.max_size(),
        })
    }

    /// Removes `key` from both tiers. Returns true if either tier held it.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        let in_memory = self.memory.evict(key);
        let on_disk = self
            .with_disk(key.clone(), |store, key| store.remove(&key))
            .await
            .unwrap_or(false);
        in_memory || on_disk
    }

    /// Drops every record from the disk tier.
    ///
    /// # Errors
    /// Returns error if the disk tier is unavailable or cannot be cleared.
    pub async fn clear_disk(&self) -> CacheResult<()> {
        let store = self
            .disk
            .wait()
            .await
            .ok_or_else(|| CacheError::Unavailable("disk tier did not open".to_string()))?;
        run_store_op(move || store.clear()).await
    }

    /// Flushes pending journal writes of the disk tier.
    ///
    /// # Errors
    /// Returns error if the journal cannot be written.
    pub async fn flush(&self) -> CacheResult<()> {
        match self.disk.wait().await {
            Some(store) => run_store_op(move || store.flush()).await,
            None => Ok(()),
        }
    }

    async fn with_disk<T, F>(&self, key: CacheKey, op: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&S, CacheKey) -> CacheResult<T> + Send + 'static,
    {
        let store = self.disk.wait().await?;
        let shown = key.to_string();
        match run_store_op(move || op(&store, key)).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %shown, error = %e, "Disk tier operation failed");
                None
            }
        }
    }

    fn miss_path(
        &self,
        key: CacheKey,
        source: SourceDescriptor,
        target_width: u32,
        target_height: u32,
    ) -> MissPath<S> {
        MissPath {
            memory: Arc::clone(&self.memory),
            disk: Arc::clone(&self.disk),
            decoder: self.decoder,
            encoding: self.config.encoding,
            io_buffer_size: self.config.io_buffer_size.max(1),
            key,
            source,
            target_width,
            target_height,
        }
    }
}

async fn run_store_op<T, F>(op: F) -> CacheResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> CacheResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| CacheError::Io(std::io::Error::other(e)))?
}

/// Everything one miss needs, detached from the coordinator.
struct MissPath<S: DiskStore> {
    memory: Arc<dyn ImageCachePort>,
    disk: Arc<InitGate<S>>,
    decoder: SampledDecoder,
    encoding: EncodedFormat,
    io_buffer_size: usize,
    key: CacheKey,
    source: SourceDescriptor,
    target_width: u32,
    target_height: u32,
}

impl<S: DiskStore> MissPath<S> {
    async fn run(self) -> Option<LoadedImage> {
        let store = self.disk.wait().await;
        let key = self.key.clone();
        match tokio::task::spawn_blocking(move || self.resolve(store.as_deref())).await {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(key = %key, error = %e, "Image load task failed");
                None
            }
        }
    }

    fn resolve(self, store: Option<&S>) -> Option<LoadedImage> {
        let from_disk = store.and_then(|store| self.read_disk(store));
        let (image, origin) = match from_disk {
            Some(image) => (image, LoadOrigin::Disk),
            None => (
                self.decoder
                    .decode_bounded(&self.source, self.target_width, self.target_height)?,
                LoadOrigin::Decoded,
            ),
        };
        let image = Arc::new(image);

        if self.memory.put(self.key.clone(), Arc::clone(&image)) {
            trace!(key = %self.key, origin = %origin, "Stored image in memory tier");
        }
        if let Some(store) = store {
            self.write_disk(store, &image);
        }

        debug!(
            key = %self.key,
            origin = %origin,
            width = image.width(),
            height = image.height(),
            "Image loaded"
        );
        Some(LoadedImage {
            key: self.key,
            image,
            origin,
        })
    }

    fn read_disk(&self, store: &S) -> Option<DecodedImage> {
        let mut snapshot = match store.get(&self.key) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(e @ CacheError::InvalidKey { .. }) => {
                debug!(error = %e, "Skipping disk tier");
                return None;
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to read disk record");
                return None;
            }
        };

        let hint = snapshot
            .slot_len(0)
            .and_then(|len| usize::try_from(len).ok())
            .unwrap_or(0);
        let decoded = snapshot.reader(0).and_then(|reader| {
            let mut reader = BufReader::with_capacity(self.io_buffer_size, reader);
            decode_blob(&mut reader, hint)
        });
        match decoded {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Disk record unreadable, decoding source");
                None
            }
        }
    }

    fn write_disk(&self, store: &S, image: &DecodedImage) {
        if store.contains(&self.key) {
            return;
        }
        let mut editor = match store.edit(&self.key) {
            Ok(Some(editor)) => editor,
            Ok(None) => {
                debug!(key = %self.key, "Disk record already being written, skipping");
                return;
            }
            Err(e @ CacheError::InvalidKey { .. }) => {
                debug!(error = %e, "Skipping disk tier");
                return;
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to start disk edit");
                return;
            }
        };

        // Another worker may have committed between the check and the edit.
        if store.contains(&self.key) {
            if let Err(e) = editor.abort() {
                warn!(key = %self.key, error = %e, "Failed to abort disk edit");
            }
            return;
        }

        match self.write_blob(&mut editor, image) {
            Ok(()) => match editor.commit().and_then(|()| store.flush()) {
                Ok(()) => debug!(key = %self.key, "Stored image in disk tier"),
                Err(e) => warn!(key = %self.key, error = %e, "Failed to commit disk record"),
            },
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to encode disk record");
                if let Err(e) = editor.abort() {
                    warn!(key = %self.key, error = %e, "Failed to abort disk edit");
                }
            }
        }
    }

    fn write_blob(&self, editor: &mut S::Editor, image: &DecodedImage) -> CacheResult<()> {
        let sink = editor.writer(0)?;
        let mut writer = BufWriter::with_capacity(self.io_buffer_size, sink);
        encode_blob(image, self.encoding, &mut writer)?;
        writer.flush()?;
        Ok(())
    }
}
