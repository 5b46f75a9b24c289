//! Event loader
//!
//! An append-only stream of nested envelopes in the data block:
//!
//! ```text
//! ┌──────────────────────────┬──────────────────────────┬─────
//! │ tag | meta | data (ev 0) │ tag | meta | data (ev 1) │ ...
//! └──────────────────────────┴──────────────────────────┴─────
//! ```
//!
//! Nested envelopes always carry a bounded data length, so iteration reads
//! one tag, then exactly the envelope it announces.

use std::sync::Arc;

use bytes::Bytes;

use crate::envelope::{Envelope, FileEnvelope, Tag, TAG_SIZE};
use crate::error::{Result, ShelfError};
use crate::index::MemoryIndex;
use crate::meta::Meta;
use crate::value::Value;

use super::LoaderBase;

/// Log of nested envelopes
pub struct EventLoader {
    base: LoaderBase,
}

impl EventLoader {
    pub(super) fn new(base: LoaderBase) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &LoaderBase {
        &self.base
    }

    /// Append one nested envelope
    pub fn push(&self, event: &Envelope) -> Result<()> {
        let bytes = event.encode(self.base.context().config().meta_codec)?;
        self.base.envelope().append(&bytes)?;
        Ok(())
    }

    pub fn push_event(&self, meta: Meta, data: impl Into<Bytes>) -> Result<()> {
        self.push(&Envelope::new(meta, data))
    }

    /// Replay every event from the start of the data block
    pub fn iter(&self) -> EventIter {
        EventIter {
            envelope: Arc::clone(self.base.envelope()),
            offset: 0,
            finished: false,
        }
    }

    /// Number of events (scans the data block)
    pub fn len(&self) -> Result<usize> {
        self.iter().try_fold(0, |n, event| event.map(|_| n + 1))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.base.envelope().data_length()? == 0)
    }

    /// In-memory index over the events keyed by the meta value at `path`
    ///
    /// Events without that value are keyed by null.
    pub fn index_by(&self, path: &str) -> MemoryIndex<Envelope> {
        let envelope = Arc::clone(self.base.envelope());
        let path = path.to_string();
        MemoryIndex::new(
            move || {
                EventIter {
                    envelope: Arc::clone(&envelope),
                    offset: 0,
                    finished: false,
                }
                .collect()
            },
            move |event: &Envelope| event.meta().get_value(&path).cloned().unwrap_or(Value::Null),
        )
    }
}

/// Streaming iterator over the events of an event loader
pub struct EventIter {
    envelope: Arc<FileEnvelope>,
    offset: u64,
    finished: bool,
}

impl EventIter {
    fn read_next(&mut self) -> Result<Option<Envelope>> {
        let data_length = self.envelope.data_length()?;
        if self.offset >= data_length {
            return Ok(None);
        }

        // Step 1: the nested tag tells how long the event is
        let head = self.envelope.read_block(self.offset, TAG_SIZE as u64)?;
        let tag = Tag::decode(&head)?;
        let length = match tag.data_length {
            Some(len) => tag.data_offset() + len,
            None => {
                return Err(ShelfError::Format(format!(
                    "Unbounded event at offset {} of {}",
                    self.offset,
                    self.envelope.path().display()
                )))
            }
        };

        // Step 2: the whole event
        let bytes = self.envelope.read_block(self.offset, length)?;
        let (event, consumed) = Envelope::decode(&bytes)?;
        self.offset += consumed as u64;
        Ok(Some(event))
    }
}

impl Iterator for EventIter {
    type Item = Result<Envelope>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
