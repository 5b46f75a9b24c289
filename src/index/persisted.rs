//! Persisted incremental index
//!
//! Indexes the lines of an append-only envelope by a key extracted from each
//! parsed line. Only bytes appended since the last update are scanned.
//!
//! ## Watermark
//! `indexed_size` is the number of data bytes already folded into the map.
//! It never decreases (except on invalidation) and never exceeds the data
//! length; it always sits on a line boundary.
//!
//! ## Snapshot File
//! ```text
//! bincode { version: u32, indexed_size: u64, data_crc: u32, map: key → [line offset] }
//! ```
//! Written whenever more than `persist_threshold` bytes were indexed since the
//! previous save. On first use a snapshot is adopted if its `indexed_size` is
//! at least the in-memory watermark, fits in the data block and `data_crc`
//! still matches the indexed bytes. An unreadable or mismatched snapshot is
//! deleted and the data is rescanned from 0.
//!
//! `data_crc` covers the first and the last `FINGERPRINT_WINDOW` bytes below
//! the watermark, which is enough to notice a data block that was cleared and
//! refilled by another process.
//!
//! Lines that fail to parse are logged and skipped; the watermark still moves
//! past them.
//!
//! Entries are not cached: each hit re-reads and re-parses its line, so
//! memory grows with the number of keys rather than with entry size.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::envelope::FileEnvelope;
use crate::error::{Result, ShelfError};
use crate::value::Value;

use super::{map_ceiling, map_exact, map_range, KeyMap, ValueIndex};

/// Snapshot format version
const SNAPSHOT_VERSION: u32 = 2;

/// Bytes hashed at each end of the indexed region
const FINGERPRINT_WINDOW: u64 = 4096;

/// Comment marker for lines skipped by the scan
pub const COMMENT_MARKER: char = '#';

/// Whether a scanned line carries an entry
///
/// Blank lines and lines starting with `#` are skipped. The check is made on
/// the raw text: encoders never produce a line that is empty or starts with
/// the marker, so whitespace-only lines are real entries.
pub fn is_content_line(text: &str) -> bool {
    !text.is_empty() && !text.starts_with(COMMENT_MARKER)
}

type LineParser<E> = Arc<dyn Fn(&str) -> Result<E> + Send + Sync>;
type KeyExtractor<E> = Arc<dyn Fn(&E) -> Value + Send + Sync>;

/// Incremental line index over a file envelope
pub struct FileIndex<E> {
    envelope: Arc<FileEnvelope>,
    cache_path: PathBuf,
    parse: LineParser<E>,
    key_of: KeyExtractor<E>,
    persist_threshold: u64,
    state: RwLock<IndexState>,
}

#[derive(Default)]
struct IndexState {
    map: KeyMap<u64>,
    /// Data bytes folded into `map`
    indexed_size: u64,
    /// `indexed_size` at the last snapshot save or load
    persisted_size: u64,
    /// Envelope epoch the map was built against
    epoch: u64,
    snapshot_checked: bool,
    /// Bytes scanned by the most recent update
    last_scan: u64,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    indexed_size: u64,
    data_crc: u32,
    map: &'a BTreeMap<Value, Vec<u64>>,
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    indexed_size: u64,
    data_crc: u32,
    map: BTreeMap<Value, Vec<u64>>,
}

impl<E> FileIndex<E> {
    /// Create an index; nothing is read until the first update or query
    pub fn new<P, K>(
        envelope: Arc<FileEnvelope>,
        cache_path: PathBuf,
        persist_threshold: u64,
        parse: P,
        key_of: K,
    ) -> Self
    where
        P: Fn(&str) -> Result<E> + Send + Sync + 'static,
        K: Fn(&E) -> Value + Send + Sync + 'static,
    {
        Self {
            envelope,
            cache_path,
            parse: Arc::new(parse),
            key_of: Arc::new(key_of),
            persist_threshold,
            state: RwLock::new(IndexState::default()),
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Data bytes already indexed
    pub fn indexed_size(&self) -> u64 {
        self.state.read().indexed_size
    }

    /// Bytes scanned by the most recent update
    pub fn last_scan_bytes(&self) -> u64 {
        self.state.read().last_scan
    }

    /// Fold newly appended lines into the map
    ///
    /// Holds the index write lock for the whole scan, so queries never see a
    /// half-updated map.
    pub fn update(&self) -> Result<()> {
        let mut state = self.state.write();

        let epoch = self.envelope.epoch();
        let data_length = self.envelope.data_length()?;
        if !state.snapshot_checked {
            state.epoch = epoch;
        }
        if epoch != state.epoch || data_length < state.indexed_size {
            tracing::debug!(
                "Data of {} was rewritten, dropping index {}",
                self.envelope.path().display(),
                self.cache_path.display()
            );
            self.reset(&mut state);
            state.epoch = epoch;
        }

        if !state.snapshot_checked {
            state.snapshot_checked = true;
            self.load_snapshot(&mut state, data_length);
        }

        state.last_scan = 0;
        if data_length <= state.indexed_size {
            return Ok(());
        }

        let start = state.indexed_size;
        let (lines, end) = self.envelope.read_lines(start, u64::MAX)?;
        for line in lines {
            if !is_content_line(&line.text) {
                continue;
            }
            let entry = match (self.parse)(&line.text) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(
                        "Skipping unparsable line at {} of {}: {}",
                        line.offset,
                        self.envelope.path().display(),
                        e
                    );
                    continue;
                }
            };
            state
                .map
                .entry((self.key_of)(&entry))
                .or_insert_with(Vec::new)
                .push(line.offset);
        }
        state.indexed_size = end;
        state.last_scan = end - start;
        tracing::trace!(
            "Indexed {} new bytes of {} (watermark {})",
            end - start,
            self.envelope.path().display(),
            end
        );

        if state.indexed_size - state.persisted_size > self.persist_threshold {
            match self.save(&state) {
                Ok(()) => state.persisted_size = state.indexed_size,
                Err(e) => tracing::warn!(
                    "Failed to persist index {}: {}",
                    self.cache_path.display(),
                    e
                ),
            }
        }
        Ok(())
    }

    /// Write the current snapshot regardless of the threshold
    pub fn persist(&self) -> Result<()> {
        let mut state = self.state.write();
        self.save(&state)?;
        state.persisted_size = state.indexed_size;
        Ok(())
    }

    /// Forget everything and delete the snapshot; the next update rescans
    /// from 0
    pub fn invalidate(&self) -> Result<()> {
        let mut state = self.state.write();
        self.reset(&mut state);
        state.epoch = self.envelope.epoch();
        Ok(())
    }

    /// Re-read and parse the line at `offset`
    pub fn transform(&self, offset: u64) -> Result<E> {
        let line = self.envelope.read_line(offset)?.ok_or_else(|| {
            ShelfError::Index(format!(
                "No line at offset {} of {}",
                offset,
                self.envelope.path().display()
            ))
        })?;
        (self.parse)(&line.text)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn reset(&self, state: &mut IndexState) {
        state.map.clear();
        state.indexed_size = 0;
        state.persisted_size = 0;
        self.delete_snapshot();
    }

    fn delete_snapshot(&self) {
        match fs::remove_file(&self.cache_path) {
            Ok(()) => tracing::debug!("Deleted index snapshot {}", self.cache_path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to delete index snapshot {}: {}",
                self.cache_path.display(),
                e
            ),
        }
    }

    fn load_snapshot(&self, state: &mut IndexState, data_length: u64) {
        let bytes = match fs::read(&self.cache_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!(
                    "Unreadable index snapshot {}: {}",
                    self.cache_path.display(),
                    e
                );
                self.delete_snapshot();
                return;
            }
        };

        let snapshot: Snapshot = match bincode::deserialize(&bytes) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(
                    "Corrupt index snapshot {}, rescanning: {}",
                    self.cache_path.display(),
                    e
                );
                self.delete_snapshot();
                return;
            }
        };

        if snapshot.version != SNAPSHOT_VERSION || snapshot.indexed_size > data_length {
            tracing::debug!(
                "Discarding stale index snapshot {} (indexed {}, data {})",
                self.cache_path.display(),
                snapshot.indexed_size,
                data_length
            );
            self.delete_snapshot();
            return;
        }

        match self.fingerprint(snapshot.indexed_size) {
            Ok(crc) if crc == snapshot.data_crc => {}
            Ok(_) => {
                tracing::debug!(
                    "Index snapshot {} no longer matches the data, rescanning",
                    self.cache_path.display()
                );
                self.delete_snapshot();
                return;
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to verify index snapshot {}: {}",
                    self.cache_path.display(),
                    e
                );
                return;
            }
        }

        if snapshot.indexed_size >= state.indexed_size {
            tracing::debug!(
                "Loaded index snapshot {} at {} bytes",
                self.cache_path.display(),
                snapshot.indexed_size
            );
            state.map = snapshot.map;
            state.indexed_size = snapshot.indexed_size;
            state.persisted_size = snapshot.indexed_size;
        }
    }

    fn save(&self, state: &IndexState) -> Result<()> {
        if let Some(dir) = self.cache_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let bytes = bincode::serialize(&SnapshotRef {
            version: SNAPSHOT_VERSION,
            indexed_size: state.indexed_size,
            data_crc: self.fingerprint(state.indexed_size)?,
            map: &state.map,
        })?;

        let mut tmp_name = self.cache_path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, &self.cache_path)?;

        tracing::trace!(
            "Saved index snapshot {} at {} bytes",
            self.cache_path.display(),
            state.indexed_size
        );
        Ok(())
    }

    /// CRC of the head and tail windows of the first `size` data bytes
    fn fingerprint(&self, size: u64) -> Result<u32> {
        let window = size.min(FINGERPRINT_WINDOW);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&size.to_le_bytes());
        hasher.update(&self.envelope.read_block(0, window)?);
        hasher.update(&self.envelope.read_block(size - window, window)?);
        Ok(hasher.finalize())
    }

    fn offsets<T>(&self, f: impl FnOnce(&KeyMap<u64>) -> T) -> Result<T> {
        self.update()?;
        let state = self.state.read();
        Ok(f(&state.map))
    }

    fn load_all(&self, offsets: Vec<u64>) -> Result<Vec<E>> {
        offsets.into_iter().map(|o| self.transform(o)).collect()
    }
}

impl<E> ValueIndex for FileIndex<E> {
    type Entry = E;

    fn pull(&self, key: &Value) -> Result<Vec<E>> {
        let offsets = self.offsets(|map| map_exact(map, key))?;
        self.load_all(offsets)
    }

    fn pull_range(&self, from: &Value, to: &Value) -> Result<Vec<E>> {
        let offsets = self.offsets(|map| map_range(map, from, to))?;
        self.load_all(offsets)
    }

    fn ceiling(&self, key: &Value) -> Result<Option<(Value, E)>> {
        match self.offsets(|map| map_ceiling(map, key))? {
            Some((k, offset)) => Ok(Some((k, self.transform(offset)?))),
            None => Ok(None),
        }
    }

    fn key_set(&self) -> Result<Vec<Value>> {
        self.offsets(|map| map.keys().cloned().collect())
    }
}
