//! Envelope Module
//!
//! The envelope is the unit of persistence: a meta document paired with an
//! opaque data block, framed by a fixed-size tag.
//!
//! ## On-disk Layout
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Tag (28 bytes, offset 0)                │
//! ├─────────────────────────────────────────┤
//! │ Meta block (tag.meta_length bytes)      │
//! │   encoded by tag.meta_codec             │
//! ├─────────────────────────────────────────┤
//! │ Data block (tag.data_length bytes,      │
//! │   or rest of file if unbounded)         │
//! │   append-only                           │
//! └─────────────────────────────────────────┘
//! ```

mod codec;
mod file;
mod tag;

use bytes::Bytes;

use crate::error::{Result, ShelfError};
use crate::meta::Meta;

pub use codec::{BinaryMetaCodec, JsonMetaCodec, MetaCodec, MetaCodecKind};
pub use file::{FileEnvelope, Line};
pub use tag::{Tag, TAG_SIZE, UNBOUNDED};

/// An in-memory envelope: meta plus data
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    meta: Meta,
    data: Bytes,
}

impl Envelope {
    pub fn new(meta: Meta, data: impl Into<Bytes>) -> Self {
        Self {
            meta,
            data: data.into(),
        }
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_parts(self) -> (Meta, Bytes) {
        (self.meta, self.data)
    }

    /// Serialize as a self-contained envelope (tag + meta + data)
    pub fn encode(&self, codec: MetaCodecKind) -> Result<Vec<u8>> {
        let meta_bytes = codec.codec().encode(&self.meta)?;
        let tag = Tag::new(
            codec,
            meta_length(&meta_bytes)?,
            Some(self.data.len() as u64),
        );

        let mut out = Vec::with_capacity(TAG_SIZE + meta_bytes.len() + self.data.len());
        out.extend_from_slice(&tag.encode());
        out.extend_from_slice(&meta_bytes);
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    /// Parse one envelope from the start of `bytes`
    ///
    /// Returns the envelope and the number of bytes it occupied. An unbounded
    /// data length consumes the rest of the input.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        let tag = Tag::decode(bytes)?;
        let meta_end = TAG_SIZE + tag.meta_length as usize;
        if bytes.len() < meta_end {
            return Err(ShelfError::Format(format!(
                "Truncated meta block: need {} bytes, have {}",
                meta_end,
                bytes.len()
            )));
        }
        let meta = tag.meta_codec.codec().decode(&bytes[TAG_SIZE..meta_end])?;

        let data_end = match tag.data_length {
            Some(len) => meta_end + len as usize,
            None => bytes.len(),
        };
        if bytes.len() < data_end {
            return Err(ShelfError::Format(format!(
                "Truncated data block: need {} bytes, have {}",
                data_end,
                bytes.len()
            )));
        }

        let data = Bytes::copy_from_slice(&bytes[meta_end..data_end]);
        Ok((Self { meta, data }, data_end))
    }
}

/// Checked conversion of a meta block length into its tag field
pub(crate) fn meta_length(meta_bytes: &[u8]) -> Result<u32> {
    u32::try_from(meta_bytes.len())
        .map_err(|_| ShelfError::Format(format!("Meta block too large: {} bytes", meta_bytes.len())))
}
