//! File-backed envelope
//!
//! Maps one envelope onto one file. The tag and meta are parsed lazily and
//! cached; the data block grows by appending.
//!
//! ## Write Ordering
//! `append` writes the data first and rewrites the tag afterwards. A crash
//! between the two leaves the tag under-reporting the data length, which
//! [`FileEnvelope::reconcile_length`] can recover from the file size. The tag
//! carries its own CRC, so a torn tag rewrite is reported as a format error
//! rather than trusted.
//!
//! ## Concurrency
//! All file access goes through one mutex per instance: an append (data
//! write + tag rewrite) never interleaves with another append, a clear or a
//! read on the same instance. Nothing coordinates separate processes.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Result, ShelfError};
use crate::meta::Meta;

use super::codec::MetaCodecKind;
use super::tag::{Tag, TAG_SIZE};

/// One line of the data block, with its position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Offset of the first byte of the line, relative to the data block
    pub offset: u64,
    /// Line text without the trailing newline
    pub text: String,
}

/// An envelope stored in a single file
pub struct FileEnvelope {
    path: PathBuf,
    read_only: bool,
    sync_on_append: bool,
    state: Mutex<FileState>,
}

/// Mutable state guarded by the instance lock
struct FileState {
    /// `None` once closed
    file: Option<File>,
    /// Cached tag
    tag: Option<Tag>,
    /// Cached meta, cleared whenever the meta block is rewritten
    meta: Option<Meta>,
    /// Bumped on every non-append rewrite of the data block
    epoch: u64,
}

impl FileState {
    fn file_mut(&mut self, path: &Path) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| ShelfError::Closed(path.to_path_buf()))
    }
}

impl FileEnvelope {
    /// Create a new envelope file with the given meta and an empty data block
    ///
    /// Fails if the file already exists.
    pub fn create(path: &Path, meta: &Meta, codec: MetaCodecKind) -> Result<Self> {
        let meta_bytes = codec.codec().encode(meta)?;
        let tag = Tag::new(codec, super::meta_length(&meta_bytes)?, Some(0));

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(&tag.encode())?;
        file.write_all(&meta_bytes)?;
        file.sync_all()?;

        tracing::debug!("Created envelope {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            read_only: false,
            sync_on_append: false,
            state: Mutex::new(FileState {
                file: Some(file),
                tag: Some(tag),
                meta: Some(meta.clone()),
                epoch: 0,
            }),
        })
    }

    /// Open an existing envelope file
    ///
    /// Nothing is parsed until the tag, meta or data is first accessed.
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        if !path.is_file() {
            return Err(ShelfError::NotFound(format!(
                "Envelope file {} does not exist",
                path.display()
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            read_only,
            sync_on_append: false,
            state: Mutex::new(FileState {
                file: Some(file),
                tag: None,
                meta: None,
                epoch: 0,
            }),
        })
    }

    /// Cheap check whether a file starts with an envelope tag marker
    pub fn probe(path: &Path) -> bool {
        let mut head = [0u8; 6];
        match File::open(path).and_then(|mut f| f.read_exact(&mut head)) {
            Ok(()) => Tag::probe(&head),
            Err(_) => false,
        }
    }

    /// fsync the data after every append
    pub fn with_sync_on_append(mut self, sync: bool) -> Self {
        self.sync_on_append = sync;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Counter of non-append rewrites of the data block
    ///
    /// Incremental indices compare it with the value they last saw to detect
    /// that their append-only assumption was broken.
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    // =========================================================================
    // Structural Reads
    // =========================================================================

    /// The envelope tag (parsed on first access)
    pub fn tag(&self) -> Result<Tag> {
        let mut state = self.state.lock();
        self.ensure_tag(&mut state)
    }

    /// The envelope meta (parsed on first access, then cached)
    pub fn meta(&self) -> Result<Meta> {
        let mut state = self.state.lock();
        if let Some(meta) = &state.meta {
            return Ok(meta.clone());
        }
        let tag = self.ensure_tag(&mut state)?;
        let bytes = read_meta_bytes(state.file_mut(&self.path)?, &tag)?;
        let meta = tag.meta_codec.codec().decode(&bytes)?;
        state.meta = Some(meta.clone());
        Ok(meta)
    }

    /// Raw meta bytes as currently stored at the path, bypassing every cache
    ///
    /// Opens the path afresh, so a file replaced behind this instance's back
    /// is seen too.
    pub fn raw_meta(&self) -> Result<Vec<u8>> {
        let _state = self.state.lock();
        let mut file = File::open(&self.path)?;
        let tag = read_tag(&mut file, &self.path)?;
        read_meta_bytes(&mut file, &tag)
    }

    /// Length of the data block
    ///
    /// For an unbounded tag this is the rest of the file.
    pub fn data_length(&self) -> Result<u64> {
        let mut state = self.state.lock();
        self.current_data_length(&mut state)
    }

    /// The whole data block
    pub fn data(&self) -> Result<Bytes> {
        let length = self.data_length()?;
        self.read_block(0, length)
    }

    /// Read up to `length` bytes of the data block starting at `offset`
    ///
    /// Reads are clamped to the end of the data block.
    pub fn read_block(&self, offset: u64, length: u64) -> Result<Bytes> {
        let mut state = self.state.lock();
        let data_length = self.current_data_length(&mut state)?;
        if offset > data_length {
            return Err(ShelfError::Format(format!(
                "Read offset {} beyond data length {} in {}",
                offset,
                data_length,
                self.path.display()
            )));
        }
        let length = length.min(data_length - offset);
        let start = self.ensure_tag(&mut state)?.data_offset() + offset;

        let file = state.file_mut(&self.path)?;
        file.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Read the complete line starting at `offset`
    ///
    /// Returns `None` at the end of the data block, or when the remaining
    /// bytes do not end in a newline (an unfinished write).
    pub fn read_line(&self, offset: u64) -> Result<Option<Line>> {
        let (mut lines, _) = self.read_lines(offset, 1)?;
        Ok(lines.pop())
    }

    /// Read complete lines starting at `offset`
    ///
    /// Stops once at least `byte_budget` bytes were consumed, at the end of
    /// the data block, or before a trailing partial line. Returns the lines
    /// and the offset just past the last complete line.
    pub fn read_lines(&self, offset: u64, byte_budget: u64) -> Result<(Vec<Line>, u64)> {
        let mut state = self.state.lock();
        let data_length = self.current_data_length(&mut state)?;
        if offset >= data_length {
            return Ok((Vec::new(), offset));
        }
        let start = self.ensure_tag(&mut state)?.data_offset() + offset;

        let file = state.file_mut(&self.path)?;
        file.seek(SeekFrom::Start(start))?;
        let mut reader = BufReader::new(Read::by_ref(file).take(data_length - offset));

        let mut lines = Vec::new();
        let mut position = offset;
        let mut buf = Vec::new();
        while position - offset < byte_budget {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf)?;
            if n == 0 || buf.last() != Some(&b'\n') {
                break;
            }
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            let text = String::from_utf8(buf.clone()).map_err(|e| {
                ShelfError::Format(format!(
                    "Invalid UTF-8 line at offset {} in {}: {}",
                    position,
                    self.path.display(),
                    e
                ))
            })?;
            lines.push(Line {
                offset: position,
                text,
            });
            position += n as u64;
        }
        Ok((lines, position))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Append bytes to the data block and rewrite the tag
    ///
    /// Bytes past the recorded data length are discarded first; call
    /// [`reconcile_length`](Self::reconcile_length) beforehand to keep them.
    /// Returns the new data length.
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        self.check_writable()?;
        let mut state = self.state.lock();
        let tag = self.ensure_tag(&mut state)?;
        let current = self.current_data_length(&mut state)?;
        let new_length = current + bytes.len() as u64;
        let new_tag = tag.with_data_length(Some(new_length));

        let file = state.file_mut(&self.path)?;
        let end = tag.data_offset() + current;

        // Step 1: drop bytes past the recorded length left by an interrupted
        // append; appending over them would splice old and new data
        let file_length = file.metadata()?.len();
        if file_length > end {
            tracing::warn!(
                "Discarding {} unrecorded bytes at the end of {}",
                file_length - end,
                self.path.display()
            );
            file.set_len(end)?;
        }

        // Step 2: data
        file.seek(SeekFrom::Start(end))?;
        file.write_all(bytes)?;
        if self.sync_on_append {
            file.sync_data()?;
        }

        // Step 3: tag
        write_tag(file, &new_tag)?;
        state.tag = Some(new_tag);

        tracing::trace!(
            "Appended {} bytes to {} (data length {})",
            bytes.len(),
            self.path.display(),
            new_length
        );
        Ok(new_length)
    }

    /// Truncate the data block to zero length
    pub fn clear_data(&self) -> Result<()> {
        self.replace_data(&[])
    }

    /// Replace the whole data block in one step
    pub fn replace_data(&self, bytes: &[u8]) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock();
        let tag = self.ensure_tag(&mut state)?;
        let new_tag = tag.with_data_length(Some(bytes.len() as u64));

        let file = state.file_mut(&self.path)?;
        file.set_len(tag.data_offset())?;
        if !bytes.is_empty() {
            file.seek(SeekFrom::Start(tag.data_offset()))?;
            file.write_all(bytes)?;
        }
        file.sync_data()?;
        write_tag(file, &new_tag)?;

        state.tag = Some(new_tag);
        state.epoch += 1;
        tracing::debug!(
            "Rewrote data block of {} ({} bytes)",
            self.path.display(),
            bytes.len()
        );
        Ok(())
    }

    /// Replace the meta block, keeping the data block
    ///
    /// The meta length changes, so the envelope is written to a sibling
    /// temporary file which then replaces the original.
    pub fn set_meta(&self, meta: &Meta) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock();
        let tag = self.ensure_tag(&mut state)?;
        let data_length = self.current_data_length(&mut state)?;

        let meta_bytes = tag.meta_codec.codec().encode(meta)?;
        let new_tag = Tag::new(
            tag.meta_codec,
            super::meta_length(&meta_bytes)?,
            Some(data_length),
        );

        let file = state.file_mut(&self.path)?;
        file.seek(SeekFrom::Start(tag.data_offset()))?;
        let mut data = vec![0u8; data_length as usize];
        file.read_exact(&mut data)?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            tmp.write_all(&new_tag.encode())?;
            tmp.write_all(&meta_bytes)?;
            tmp.write_all(&data)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        state.file = Some(file);
        state.tag = Some(new_tag);
        state.meta = Some(meta.clone());
        Ok(())
    }

    /// Extend an under-reporting tag to cover every byte in the file
    ///
    /// Returns the new data length if the tag was changed.
    pub fn reconcile_length(&self) -> Result<Option<u64>> {
        self.check_writable()?;
        let mut state = self.state.lock();
        state.tag = None;
        let tag = self.ensure_tag(&mut state)?;
        let file = state.file_mut(&self.path)?;
        let actual = file.metadata()?.len().saturating_sub(tag.data_offset());

        match tag.data_length {
            Some(recorded) if recorded < actual => {
                let new_tag = tag.with_data_length(Some(actual));
                write_tag(file, &new_tag)?;
                state.tag = Some(new_tag);
                tracing::warn!(
                    "Tag of {} under-reported data length ({} < {}), repaired",
                    self.path.display(),
                    recorded,
                    actual
                );
                Ok(Some(actual))
            }
            _ => Ok(None),
        }
    }

    /// Reopen the path and drop the cached tag and meta
    pub fn refresh(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.file.is_none() {
            return Err(ShelfError::Closed(self.path.clone()));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(!self.read_only)
            .open(&self.path)?;
        state.file = Some(file);
        state.tag = None;
        state.meta = None;
        state.epoch += 1;
        Ok(())
    }

    /// Release the file handle; idempotent
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.file.take().is_some() {
            tracing::trace!("Closed envelope {}", self.path.display());
        }
        state.tag = None;
        state.meta = None;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().file.is_none()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(ShelfError::ReadOnly(self.path.clone()));
        }
        Ok(())
    }

    fn ensure_tag(&self, state: &mut FileState) -> Result<Tag> {
        if let Some(tag) = state.tag {
            return Ok(tag);
        }
        let tag = read_tag(state.file_mut(&self.path)?, &self.path)?;
        state.tag = Some(tag);
        Ok(tag)
    }

    fn current_data_length(&self, state: &mut FileState) -> Result<u64> {
        let tag = self.ensure_tag(state)?;
        match tag.data_length {
            Some(length) => Ok(length),
            None => {
                let file_len = state.file_mut(&self.path)?.metadata()?.len();
                Ok(file_len.saturating_sub(tag.data_offset()))
            }
        }
    }
}

impl Drop for FileEnvelope {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_tag(file: &mut File, path: &Path) -> Result<Tag> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; TAG_SIZE];
    file.read_exact(&mut buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => ShelfError::Format(format!(
            "{} is shorter than an envelope tag",
            path.display()
        )),
        _ => ShelfError::Io(e),
    })?;
    Tag::decode(&buf)
}

fn read_meta_bytes(file: &mut File, tag: &Tag) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(TAG_SIZE as u64))?;
    let mut buf = vec![0u8; tag.meta_length as usize];
    file.read_exact(&mut buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => ShelfError::Format("Truncated meta block".to_string()),
        _ => ShelfError::Io(e),
    })?;
    Ok(buf)
}

fn write_tag(file: &mut File, tag: &Tag) -> Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&tag.encode())?;
    file.flush()?;
    Ok(())
}
