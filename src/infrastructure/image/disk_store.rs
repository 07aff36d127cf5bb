//! Journal-backed disk store for encoded image blobs.
//!
//! Layout inside the store directory:
//! - `journal`: header (magic, journal format, store version, slot count, blank
//!   line) followed by one record per line: `DIRTY key`, `CLEAN key len..`,
//!   `REMOVE key`, `READ key`.
//! - `<key>.<slot>`: committed blob, `<key>.<slot>.tmp`: blob being edited.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::ports::{
    CacheError, CacheResult, DiskEditor, DiskSnapshot, DiskStore, DiskStoreOptions,
};

const JOURNAL_FILE: &str = "journal";
const JOURNAL_MAGIC: &str = "thumbcache.journal";
const JOURNAL_FORMAT: &str = "1";

const CLEAN: &str = "CLEAN";
const DIRTY: &str = "DIRTY";
const REMOVE: &str = "REMOVE";
const READ: &str = "READ";

/// Journal records that no longer describe live state before it is rewritten.
const COMPACT_THRESHOLD: usize = 2000;

fn key_pattern() -> &'static Regex {
    static KEY_REGEX: OnceLock<Regex> = OnceLock::new();
    KEY_REGEX.get_or_init(|| Regex::new(r"^[a-z0-9_-]{1,120}$").expect("Invalid regex"))
}

fn validate_key(key: &CacheKey) -> CacheResult<()> {
    if key_pattern().is_match(key.as_str()) {
        Ok(())
    } else {
        Err(CacheError::InvalidKey {
            key: key.as_str().to_string(),
        })
    }
}

#[derive(Debug, Clone)]
struct Entry {
    lengths: Vec<u64>,
    readable: bool,
    editing: bool,
}

impl Entry {
    fn new(slots: usize) -> Self {
        Self {
            lengths: vec![0; slots],
            readable: false,
            editing: false,
        }
    }

    fn total_len(&self) -> u64 {
        self.lengths.iter().sum()
    }
}

struct State {
    /// Most recently used first.
    entries: LruCache<String, Entry>,
    size: u64,
    journal: BufWriter<File>,
    redundant_ops: usize,
}

impl State {
    fn append(&mut self, line: &str) -> CacheResult<()> {
        self.journal.write_all(line.as_bytes())?;
        self.journal.write_all(b"\n")?;
        Ok(())
    }
}

struct Shared {
    dir: PathBuf,
    version: u32,
    slots: usize,
    max_bytes: u64,
    io_buffer_size: usize,
    state: Mutex<State>,
}

/// Size-bounded LRU blob store persisted through an append-only journal.
///
/// Cheap to clone; clones share the same directory and state.
#[derive(Clone)]
pub struct JournalDiskStore {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for JournalDiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalDiskStore")
            .field("dir", &self.shared.dir)
            .field("version", &self.shared.version)
            .field("max_bytes", &self.shared.max_bytes)
            .finish_non_exhaustive()
    }
}

impl JournalDiskStore {
    /// Directory owned by this store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }
}

impl Shared {
    fn clean_path(&self, key: &str, slot: usize) -> PathBuf {
        clean_path(&self.dir, key, slot)
    }

    fn dirty_path(&self, key: &str, slot: usize) -> PathBuf {
        dirty_path(&self.dir, key, slot)
    }

    fn journal_header(&self) -> [String; 4] {
        header_lines(self.version, self.slots)
    }

    fn complete_edit(&self, key: &str, written: &[bool], success: bool) -> CacheResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(entry) = state.entries.peek_mut(key) else {
            return Err(CacheError::journal(format!("no edit in flight for {key}")));
        };

        let mut outcome = Ok(());
        let mut publish = success;

        if publish && !entry.readable {
            let missing = (0..self.slots)
                .find(|&slot| !written[slot] || !self.dirty_path(key, slot).exists());
            if let Some(slot) = missing {
                outcome = Err(CacheError::IncompleteEdit {
                    key: key.to_string(),
                    slot,
                });
                publish = false;
            }
        }

        for (slot, &was_written) in written.iter().enumerate() {
            let dirty = self.dirty_path(key, slot);
            if publish && was_written {
                let clean = self.clean_path(key, slot);
                match fs::rename(&dirty, &clean).and_then(|()| fs::metadata(&clean)) {
                    Ok(meta) => {
                        state.size = state.size - entry.lengths[slot] + meta.len();
                        entry.lengths[slot] = meta.len();
                    }
                    Err(e) => {
                        remove_quietly(&dirty);
                        outcome = Err(e.into());
                    }
                }
            } else {
                remove_quietly(&dirty);
            }
        }

        entry.editing = false;
        let keep = entry.readable || (publish && outcome.is_ok());
        if keep {
            entry.readable = true;
            let line = clean_line(key, &entry.lengths);
            state.append(&line)?;
        } else {
            state.entries.pop(key);
            state.append(&format!("{REMOVE} {key}"))?;
        }
        state.redundant_ops += 1;
        state.journal.flush()?;

        if keep && publish && outcome.is_ok() {
            debug!(key, size = state.size, "Committed disk store record");
        }

        self.trim_to_size(state)?;
        if should_compact(state) {
            self.compact(state)?;
        }

        outcome
    }

    fn remove_entry(&self, state: &mut State, key: &str) -> CacheResult<()> {
        let Some(entry) = state.entries.pop(key) else {
            return Ok(());
        };
        for slot in 0..self.slots {
            let path = self.clean_path(key, slot);
            if let Err(e) = fs::remove_file(&path)
                && e.kind() != io::ErrorKind::NotFound
            {
                return Err(e.into());
            }
        }
        state.size = state.size.saturating_sub(entry.total_len());
        state.redundant_ops += 1;
        state.append(&format!("{REMOVE} {key}"))
    }

    fn trim_to_size(&self, state: &mut State) -> CacheResult<()> {
        while state.size > self.max_bytes {
            let victim = state
                .entries
                .iter()
                .rev()
                .find(|(_, entry)| entry.readable && !entry.editing)
                .map(|(key, _)| key.clone());
            let Some(key) = victim else {
                break;
            };
            self.remove_entry(state, &key)?;
            debug!(
                key = %key,
                size = state.size,
                max_size = self.max_bytes,
                "Evicted disk store record"
            );
        }
        Ok(())
    }

    fn compact(&self, state: &mut State) -> CacheResult<()> {
        state.journal.flush()?;
        write_journal(&self.dir, &self.journal_header(), &state.entries)?;
        state.journal = open_journal_writer(&self.dir, self.io_buffer_size)?;
        debug!(
            redundant = state.redundant_ops,
            entries = state.entries.len(),
            "Compacted disk store journal"
        );
        state.redundant_ops = 0;
        Ok(())
    }
}

fn clean_path(dir: &Path, key: &str, slot: usize) -> PathBuf {
    dir.join(format!("{key}.{slot}"))
}

fn dirty_path(dir: &Path, key: &str, slot: usize) -> PathBuf {
    dir.join(format!("{key}.{slot}.tmp"))
}

fn should_compact(state: &State) -> bool {
    state.redundant_ops >= COMPACT_THRESHOLD && state.redundant_ops >= state.entries.len()
}

fn header_lines(version: u32, slots: usize) -> [String; 4] {
    [
        JOURNAL_MAGIC.to_string(),
        JOURNAL_FORMAT.to_string(),
        version.to_string(),
        slots.to_string(),
    ]
}

fn clean_line(key: &str, lengths: &[u64]) -> String {
    let mut line = format!("{CLEAN} {key}");
    for len in lengths {
        line.push(' ');
        line.push_str(&len.to_string());
    }
    line
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove disk store file");
    }
}

fn open_journal_writer(dir: &Path, io_buffer_size: usize) -> CacheResult<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(JOURNAL_FILE))?;
    Ok(BufWriter::with_capacity(io_buffer_size, file))
}

/// Atomically replaces the journal with one line per live entry.
fn write_journal(
    dir: &Path,
    header: &[String; 4],
    entries: &LruCache<String, Entry>,
) -> CacheResult<()> {
    let temp_file = tempfile::NamedTempFile::new_in(dir)?;
    let mut writer = BufWriter::new(temp_file);
    for line in header {
        writeln!(writer, "{line}")?;
    }
    writeln!(writer)?;
    // Oldest first so that replay restores recency order.
    for (key, entry) in entries.iter().rev() {
        if entry.editing {
            writeln!(writer, "{DIRTY} {key}")?;
        } else if entry.readable {
            writeln!(writer, "{}", clean_line(key, &entry.lengths))?;
        }
    }
    let temp_file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
    temp_file
        .persist(dir.join(JOURNAL_FILE))
        .map_err(|e| e.error)?;
    Ok(())
}

/// Replays the journal into `entries`. Returns the number of records read.
fn read_journal(
    path: &Path,
    header: &[String; 4],
    slots: usize,
    entries: &mut LruCache<String, Entry>,
) -> CacheResult<usize> {
    let mut lines = BufReader::new(File::open(path)?).lines();

    for expected in header {
        let line = lines.next().transpose()?.unwrap_or_default();
        if &line != expected {
            return Err(CacheError::journal(format!(
                "unexpected header: expected {expected:?}, found {line:?}"
            )));
        }
    }
    let blank = lines.next().transpose()?.unwrap_or_default();
    if !blank.is_empty() {
        return Err(CacheError::journal("missing header terminator"));
    }

    let mut records = 0;
    for line in lines {
        let line = line?;
        let mut parts = line.split(' ');
        let (Some(op), Some(key)) = (parts.next(), parts.next()) else {
            return Err(CacheError::journal(format!("malformed record: {line:?}")));
        };

        match op {
            REMOVE => {
                entries.pop(key);
            }
            DIRTY => {
                entries.get_or_insert_mut(key.to_string(), || Entry::new(slots)).editing = true;
            }
            CLEAN => {
                let lengths = parts
                    .map(str::parse::<u64>)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| CacheError::journal(format!("bad length in {line:?}: {e}")))?;
                if lengths.len() != slots {
                    return Err(CacheError::journal(format!("wrong slot count in {line:?}")));
                }
                let entry = entries.get_or_insert_mut(key.to_string(), || Entry::new(slots));
                entry.lengths = lengths;
                entry.readable = true;
                entry.editing = false;
            }
            READ => {
                entries.get(key);
            }
            _ => {
                return Err(CacheError::journal(format!("unknown record: {line:?}")));
            }
        }
        records += 1;
    }

    Ok(records)
}

fn blob_file_pattern() -> &'static Regex {
    static BLOB_REGEX: OnceLock<Regex> = OnceLock::new();
    BLOB_REGEX
        .get_or_init(|| Regex::new(r"^[a-z0-9_-]{1,120}\.[0-9]+(\.tmp)?$").expect("Invalid regex"))
}

/// Deletes the journal and every blob file the store could have written.
/// Anything else in `dir` is left alone.
fn discard_store_files(dir: &Path) -> CacheResult<usize> {
    let mut removed = 0;
    for dirent in fs::read_dir(dir)? {
        let dirent = dirent?;
        if !dirent.file_type()?.is_file() {
            continue;
        }
        let name = dirent.file_name();
        let owned = name
            .to_str()
            .is_some_and(|name| name == JOURNAL_FILE || blob_file_pattern().is_match(name));
        if owned {
            fs::remove_file(dirent.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

impl DiskStore for JournalDiskStore {
    type Editor = JournalEditor;
    type Snapshot = JournalSnapshot;

    fn open(options: &DiskStoreOptions) -> CacheResult<Self> {
        let dir = options.dir.clone();
        let slots = options.slots_per_key.max(1);
        let header = header_lines(options.version, slots);
        fs::create_dir_all(&dir)?;

        let journal_path = dir.join(JOURNAL_FILE);
        let mut entries = LruCache::unbounded();
        if journal_path.exists()
            && let Err(e) = read_journal(&journal_path, &header, slots, &mut entries)
        {
            warn!(dir = %dir.display(), error = %e, "Discarding disk store contents");
            entries.clear();
            let removed = discard_store_files(&dir)?;
            debug!(dir = %dir.display(), removed, "Removed disk store files");
        }

        // Edits that never completed leave no usable record.
        let unfinished: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.editing || !entry.readable)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &unfinished {
            entries.pop(key);
            for slot in 0..slots {
                remove_quietly(&dirty_path(&dir, key, slot));
                remove_quietly(&clean_path(&dir, key, slot));
            }
        }

        write_journal(&dir, &header, &entries)?;

        let size = entries.iter().map(|(_, entry)| entry.total_len()).sum();
        let shared = Shared {
            dir: dir.clone(),
            version: options.version,
            slots,
            max_bytes: options.max_bytes,
            io_buffer_size: options.io_buffer_size,
            state: Mutex::new(State {
                entries,
                size,
                journal: open_journal_writer(&dir, options.io_buffer_size)?,
                redundant_ops: 0,
            }),
        };
        {
            let mut state = shared.state.lock();
            shared.trim_to_size(&mut state)?;
            state.journal.flush()?;
        }

        let store = Self {
            shared: Arc::new(shared),
        };
        info!(
            dir = %dir.display(),
            entries = store.len(),
            size = store.size(),
            discarded = unfinished.len(),
            "Opened disk store"
        );
        Ok(store)
    }

    fn edit(&self, key: &CacheKey) -> CacheResult<Option<JournalEditor>> {
        validate_key(key)?;
        let shared = &self.shared;
        let mut state = shared.state.lock();
        let name = key.as_str();

        let in_flight = state.entries.peek_mut(name).map(|entry| {
            let was_editing = entry.editing;
            entry.editing = true;
            was_editing
        });
        let created = match in_flight {
            Some(true) => {
                trace!(key = %key, "Disk store edit already in flight");
                return Ok(None);
            }
            Some(false) => false,
            None => {
                let mut entry = Entry::new(shared.slots);
                entry.editing = true;
                state.entries.put(name.to_string(), entry);
                true
            }
        };

        let journaled = state
            .append(&format!("{DIRTY} {name}"))
            .and_then(|()| state.journal.flush().map_err(CacheError::from));
        if let Err(e) = journaled {
            if created {
                state.entries.pop(name);
            } else if let Some(entry) = state.entries.peek_mut(name) {
                entry.editing = false;
            }
            return Err(e);
        }

        Ok(Some(JournalEditor {
            shared: Arc::clone(shared),
            key: name.to_string(),
            written: vec![false; shared.slots],
            done: false,
        }))
    }

    fn get(&self, key: &CacheKey) -> CacheResult<Option<JournalSnapshot>> {
        validate_key(key)?;
        let shared = &self.shared;
        let mut guard = shared.state.lock();
        let state = &mut *guard;
        let name = key.as_str();

        let lengths = match state.entries.get(name) {
            Some(entry) if entry.readable => entry.lengths.clone(),
            _ => {
                trace!(key = %key, "Disk store miss");
                return Ok(None);
            }
        };

        let mut readers = Vec::with_capacity(shared.slots);
        for slot in 0..shared.slots {
            match File::open(shared.clean_path(name, slot)) {
                Ok(file) => readers.push(file),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(key = %key, slot, "Disk store record lost its blob, dropping it");
                    shared.remove_entry(state, name)?;
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }

        state.redundant_ops += 1;
        state.append(&format!("{READ} {name}"))?;
        if should_compact(state) {
            shared.compact(state)?;
        }

        trace!(key = %key, "Disk store hit");
        Ok(Some(JournalSnapshot { readers, lengths }))
    }

    fn contains(&self, key: &CacheKey) -> bool {
        if validate_key(key).is_err() {
            return false;
        }
        let state = self.shared.state.lock();
        state
            .entries
            .peek(key.as_str())
            .is_some_and(|entry| entry.readable)
    }

    fn remove(&self, key: &CacheKey) -> CacheResult<bool> {
        validate_key(key)?;
        let shared = &self.shared;
        let mut guard = shared.state.lock();
        let state = &mut *guard;
        let name = key.as_str();

        match state.entries.peek(name) {
            Some(entry) if entry.readable && !entry.editing => {}
            _ => return Ok(false),
        }
        shared.remove_entry(state, name)?;
        state.journal.flush()?;
        debug!(key = %key, "Removed disk store record");
        Ok(true)
    }

    fn flush(&self) -> CacheResult<()> {
        self.shared.state.lock().journal.flush()?;
        Ok(())
    }

    fn clear(&self) -> CacheResult<()> {
        let shared = &self.shared;
        let mut guard = shared.state.lock();
        let state = &mut *guard;

        let keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.readable && !entry.editing)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            shared.remove_entry(state, key)?;
        }
        shared.compact(state)?;
        debug!(removed = keys.len(), "Cleared disk store");
        Ok(())
    }

    fn size(&self) -> u64 {
        self.shared.state.lock().size
    }

    fn max_size(&self) -> u64 {
        self.shared.max_bytes
    }

    fn len(&self) -> usize {
        let state = self.shared.state.lock();
        state.entries.iter().filter(|(_, entry)| entry.readable).count()
    }
}

/// Exclusive edit of one key in a [`JournalDiskStore`].
pub struct JournalEditor {
    shared: Arc<Shared>,
    key: String,
    written: Vec<bool>,
    done: bool,
}

impl std::fmt::Debug for JournalEditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalEditor")
            .field("key", &self.key)
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

impl DiskEditor for JournalEditor {
    fn writer(&mut self, slot: usize) -> CacheResult<Box<dyn Write + Send>> {
        let Some(flag) = self.written.get_mut(slot) else {
            return Err(CacheError::SlotOutOfRange {
                slot,
                slots: self.shared.slots,
            });
        };
        let file = File::create(self.shared.dirty_path(&self.key, slot))?;
        *flag = true;
        Ok(Box::new(file))
    }

    fn commit(mut self) -> CacheResult<()> {
        self.done = true;
        self.shared.complete_edit(&self.key, &self.written, true)
    }

    fn abort(mut self) -> CacheResult<()> {
        self.done = true;
        self.shared.complete_edit(&self.key, &self.written, false)
    }
}

impl Drop for JournalEditor {
    fn drop(&mut self) {
        if !self.done
            && let Err(e) = self.shared.complete_edit(&self.key, &self.written, false)
        {
            warn!(key = %self.key, error = %e, "Failed to abort abandoned disk store edit");
        }
    }
}

/// Open files of one committed record.
#[derive(Debug)]
pub struct JournalSnapshot {
    readers: Vec<File>,
    lengths: Vec<u64>,
}

impl DiskSnapshot for JournalSnapshot {
    fn reader(&mut self, slot: usize) -> CacheResult<&mut (dyn Read + Send)> {
        let slots = self.readers.len();
        self.readers
            .get_mut(slot)
            .map(|file| file as &mut (dyn Read + Send))
            .ok_or(CacheError::SlotOutOfRange { slot, slots })
    }

    fn slot_len(&self, slot: usize) -> Option<u64> {
        self.lengths.get(slot).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(dir: &Path, max_bytes: u64) -> DiskStoreOptions {
        DiskStoreOptions {
            dir: dir.join("thumbnails"),
            version: 1,
            slots_per_key: 1,
            max_bytes,
            io_buffer_size: 4096,
        }
    }

    fn create_test_store() -> (JournalDiskStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = JournalDiskStore::open(&options(temp_dir.path(), 1024 * 1024)).unwrap();
        (store, temp_dir)
    }

    fn put(store: &JournalDiskStore, key: &str, data: &[u8]) {
        let mut editor = store.edit(&CacheKey::new(key)).unwrap().unwrap();
        editor.writer(0).unwrap().write_all(data).unwrap();
        editor.commit().unwrap();
    }

    fn read(store: &JournalDiskStore, key: &str) -> Option<Vec<u8>> {
        let mut snapshot = store.get(&CacheKey::new(key)).unwrap()?;
        let mut out = Vec::new();
        snapshot.reader(0).unwrap().read_to_end(&mut out).unwrap();
        Some(out)
    }

    #[test]
    fn test_put_and_get() {
        let (store, _temp) = create_test_store();
        put(&store, "test1", b"test image data");

        assert_eq!(read(&store, "test1").unwrap(), b"test image data");
        assert!(store.contains(&CacheKey::new("test1")));
        assert_eq!(store.len(), 1);
        assert_eq!(store.size(), 15);
    }

    #[test]
    fn test_miss() {
        let (store, _temp) = create_test_store();
        assert!(read(&store, "nonexistent").is_none());
        assert!(!store.contains(&CacheKey::new("nonexistent")));
    }

    #[test]
    fn test_snapshot_reports_slot_len() {
        let (store, _temp) = create_test_store();
        put(&store, "sized", b"12345");

        let snapshot = store.get(&CacheKey::new("sized")).unwrap().unwrap();
        assert_eq!(snapshot.slot_len(0), Some(5));
        assert_eq!(snapshot.slot_len(1), None);
    }

    #[test]
    fn test_second_edit_is_rejected_while_first_in_flight() {
        let (store, _temp) = create_test_store();
        let key = CacheKey::new("contended");

        let first = store.edit(&key).unwrap();
        assert!(first.is_some());
        assert!(store.edit(&key).unwrap().is_none());

        let mut first = first.unwrap();
        first.writer(0).unwrap().write_all(b"one").unwrap();
        first.commit().unwrap();

        assert!(store.edit(&key).unwrap().is_some());
    }

    #[test]
    fn test_abort_keeps_previous_record() {
        let (store, _temp) = create_test_store();
        put(&store, "kept", b"original");

        let mut editor = store.edit(&CacheKey::new("kept")).unwrap().unwrap();
        editor.writer(0).unwrap().write_all(b"replacement").unwrap();
        editor.abort().unwrap();

        assert_eq!(read(&store, "kept").unwrap(), b"original");
        assert_eq!(store.size(), 8);
    }

    #[test]
    fn test_abort_of_new_key_leaves_nothing() {
        let (store, temp) = create_test_store();
        let mut editor = store.edit(&CacheKey::new("fresh")).unwrap().unwrap();
        editor.writer(0).unwrap().write_all(b"partial").unwrap();
        editor.abort().unwrap();

        assert!(read(&store, "fresh").is_none());
        assert!(store.is_empty());
        assert!(!temp.path().join("thumbnails").join("fresh.0.tmp").exists());
    }

    #[test]
    fn test_dropped_editor_aborts() {
        let (store, _temp) = create_test_store();
        let key = CacheKey::new("dropped");
        {
            let mut editor = store.edit(&key).unwrap().unwrap();
            editor.writer(0).unwrap().write_all(b"never committed").unwrap();
        }

        assert!(!store.contains(&key));
        assert!(store.edit(&key).unwrap().is_some());
    }

    #[test]
    fn test_commit_without_data_fails() {
        let (store, _temp) = create_test_store();
        let editor = store.edit(&CacheKey::new("empty")).unwrap().unwrap();

        let result = editor.commit();
        assert!(matches!(result, Err(CacheError::IncompleteEdit { slot: 0, .. })));
        assert!(!store.contains(&CacheKey::new("empty")));
    }

    #[test]
    fn test_invalid_key_rejected() {
        let (store, _temp) = create_test_store();
        let key = CacheKey::new("Not/A Valid Key");

        assert!(matches!(store.edit(&key), Err(CacheError::InvalidKey { .. })));
        assert!(matches!(store.get(&key), Err(CacheError::InvalidKey { .. })));
        assert!(!store.contains(&key));
    }

    #[test]
    fn test_writer_slot_out_of_range() {
        let (store, _temp) = create_test_store();
        let mut editor = store.edit(&CacheKey::new("slots")).unwrap().unwrap();
        assert!(matches!(
            editor.writer(1),
            Err(CacheError::SlotOutOfRange { slot: 1, slots: 1 })
        ));
    }

    #[test]
    fn test_records_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = JournalDiskStore::open(&options(temp_dir.path(), 1024)).unwrap();
            put(&store, "persisted", b"still here");
            store.flush().unwrap();
        }

        let store = JournalDiskStore::open(&options(temp_dir.path(), 1024)).unwrap();
        assert_eq!(read(&store, "persisted").unwrap(), b"still here");
        assert_eq!(store.size(), 10);
    }

    #[test]
    fn test_version_change_discards_records() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = JournalDiskStore::open(&options(temp_dir.path(), 1024)).unwrap();
            put(&store, "old", b"v1 data");
        }

        let mut bumped = options(temp_dir.path(), 1024);
        bumped.version = 2;
        let store = JournalDiskStore::open(&bumped).unwrap();

        assert!(store.is_empty());
        assert!(read(&store, "old").is_none());
        assert!(!bumped.dir.join("old.0").exists());
    }

    #[test]
    fn test_version_change_leaves_foreign_files() {
        let temp_dir = TempDir::new().unwrap();
        let mut opts = options(temp_dir.path(), 1024);
        opts.dir = temp_dir.path().to_path_buf();
        fs::write(temp_dir.path().join("users_photo.jpg"), b"not ours").unwrap();
        fs::create_dir(temp_dir.path().join("albums")).unwrap();
        {
            let store = JournalDiskStore::open(&opts).unwrap();
            put(&store, "old", b"v1 data");
        }

        opts.version = 2;
        let store = JournalDiskStore::open(&opts).unwrap();

        assert!(store.is_empty());
        assert!(!temp_dir.path().join("old.0").exists());
        assert_eq!(
            fs::read(temp_dir.path().join("users_photo.jpg")).unwrap(),
            b"not ours"
        );
        assert!(temp_dir.path().join("albums").is_dir());
    }

    #[test]
    fn test_corrupt_journal_discards_records() {
        let temp_dir = TempDir::new().unwrap();
        let opts = options(temp_dir.path(), 1024);
        {
            let store = JournalDiskStore::open(&opts).unwrap();
            put(&store, "doomed", b"data");
        }
        let mut journal = OpenOptions::new()
            .append(true)
            .open(opts.dir.join(JOURNAL_FILE))
            .unwrap();
        writeln!(journal, "BOGUS record").unwrap();

        let store = JournalDiskStore::open(&opts).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_unfinished_edit_discarded_on_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let opts = options(temp_dir.path(), 1024);
        {
            let store = JournalDiskStore::open(&opts).unwrap();
            let mut editor = store.edit(&CacheKey::new("crashed")).unwrap().unwrap();
            editor.writer(0).unwrap().write_all(b"half").unwrap();
            // Simulate a crash mid-edit.
            std::mem::forget(editor);
        }

        let store = JournalDiskStore::open(&opts).unwrap();
        assert!(!store.contains(&CacheKey::new("crashed")));
        assert!(!opts.dir.join("crashed.0.tmp").exists());
        assert!(store.edit(&CacheKey::new("crashed")).unwrap().is_some());
    }

    #[test]
    fn test_eviction_by_size_is_lru() {
        let temp_dir = TempDir::new().unwrap();
        let store = JournalDiskStore::open(&options(temp_dir.path(), 10)).unwrap();

        put(&store, "a", b"1234");
        put(&store, "b", b"1234");
        // Touch a so b becomes least recently used.
        assert!(read(&store, "a").is_some());
        put(&store, "c", b"1234");

        assert!(store.contains(&CacheKey::new("a")));
        assert!(!store.contains(&CacheKey::new("b")));
        assert!(store.contains(&CacheKey::new("c")));
        assert_eq!(store.size(), 8);
    }

    #[test]
    fn test_reopen_with_smaller_budget_trims() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = JournalDiskStore::open(&options(temp_dir.path(), 100)).unwrap();
            put(&store, "first", b"0123456789");
            put(&store, "second", b"0123456789");
        }

        let store = JournalDiskStore::open(&options(temp_dir.path(), 15)).unwrap();
        assert!(!store.contains(&CacheKey::new("first")));
        assert!(store.contains(&CacheKey::new("second")));
    }

    #[test]
    fn test_remove_and_clear() {
        let (store, _temp) = create_test_store();
        put(&store, "one", b"data1");
        put(&store, "two", b"data2");
        put(&store, "three", b"data3");

        assert!(store.remove(&CacheKey::new("one")).unwrap());
        assert!(!store.remove(&CacheKey::new("one")).unwrap());
        assert_eq!(store.len(), 2);

        store.clear().unwrap();
        assert!(store.is_empty());
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn test_journal_compacts_redundant_records() {
        let (store, _temp) = create_test_store();
        put(&store, "hot", b"x");
        for _ in 0..(COMPACT_THRESHOLD + 100) {
            assert!(read(&store, "hot").is_some());
        }
        store.flush().unwrap();

        let journal = fs::read_to_string(store.dir().join(JOURNAL_FILE)).unwrap();
        assert!(journal.lines().count() < 200);
        assert!(journal.starts_with(JOURNAL_MAGIC));
    }
}
