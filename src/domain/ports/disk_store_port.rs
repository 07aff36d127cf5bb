//! Port definition for the persistent disk tier.
//!
//! The coordinator only composes these operations; it never looks at the
//! store's on-disk layout.

use std::io::{Read, Write};
use std::path::PathBuf;

use super::CacheResult;
use crate::domain::entities::CacheKey;

/// Parameters a disk store is opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskStoreOptions {
    /// Directory owned by the store.
    pub dir: PathBuf,
    /// Format version; a mismatch with the persisted one discards every record.
    pub version: u32,
    /// Number of blob slots per key.
    pub slots_per_key: usize,
    /// Upper bound on occupied bytes.
    pub max_bytes: u64,
    /// Buffer size used for journal I/O.
    pub io_buffer_size: usize,
}

/// Persistent, versioned, size-bounded LRU key to blob store.
pub trait DiskStore: Send + Sync + Sized + 'static {
    /// Exclusive write transaction for one key.
    type Editor: DiskEditor;
    /// Readable view of a committed record.
    type Snapshot: DiskSnapshot;

    /// Opens (or creates) the store. Blocking.
    ///
    /// # Errors
    /// Returns error if the directory or journal cannot be prepared.
    fn open(options: &DiskStoreOptions) -> CacheResult<Self>;

    /// Starts an edit. `Ok(None)` means another edit for `key` is in flight.
    ///
    /// # Errors
    /// Returns error for invalid keys or journal I/O failures.
    fn edit(&self, key: &CacheKey) -> CacheResult<Option<Self::Editor>>;

    /// Returns a snapshot of the committed record, if any.
    ///
    /// # Errors
    /// Returns error for invalid keys or if the record's files cannot be opened.
    fn get(&self, key: &CacheKey) -> CacheResult<Option<Self::Snapshot>>;

    /// Returns true if a committed record exists for `key`.
    fn contains(&self, key: &CacheKey) -> bool;

    /// Drops the committed record for `key`. Returns false if there was none
    /// or it is currently being edited.
    ///
    /// # Errors
    /// Returns error if files or the journal cannot be updated.
    fn remove(&self, key: &CacheKey) -> CacheResult<bool>;

    /// Forces buffered journal writes to disk.
    ///
    /// # Errors
    /// Returns error on I/O failure.
    fn flush(&self) -> CacheResult<()>;

    /// Drops every record that is not being edited.
    ///
    /// # Errors
    /// Returns error if files or the journal cannot be updated.
    fn clear(&self) -> CacheResult<()>;

    /// Occupied bytes of committed records.
    fn size(&self) -> u64;

    /// Configured byte budget.
    fn max_size(&self) -> u64;

    /// Number of committed records.
    fn len(&self) -> usize;

    /// Returns true if the store holds no committed records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An in-flight, key-scoped write against a [`DiskStore`].
///
/// Dropping an editor without calling [`commit`](Self::commit) aborts it.
pub trait DiskEditor: Send {
    /// Opens the output sink for `slot`, replacing anything written to it
    /// earlier in this edit.
    ///
    /// # Errors
    /// Returns error if the slot is out of range or the file cannot be created.
    fn writer(&mut self, slot: usize) -> CacheResult<Box<dyn Write + Send>>;

    /// Makes the written slots durable and visible to `get`.
    ///
    /// # Errors
    /// Returns error if a slot is missing or the files cannot be published; the
    /// edit is aborted in that case.
    fn commit(self) -> CacheResult<()>;

    /// Discards the written slots and leaves any prior record untouched.
    ///
    /// # Errors
    /// Returns error if the journal cannot be updated.
    fn abort(self) -> CacheResult<()>;
}

/// Readable view of one committed record.
pub trait DiskSnapshot: Send {
    /// Input source for `slot`.
    ///
    /// # Errors
    /// Returns error if the slot is out of range.
    fn reader(&mut self, slot: usize) -> CacheResult<&mut (dyn Read + Send)>;

    /// Stored length of `slot` in bytes.
    fn slot_len(&self, slot: usize) -> Option<u64>;
}
