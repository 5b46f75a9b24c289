//! Envelope tag
//!
//! The tag is the fixed-size header at offset 0 of every envelope. It is the
//! only part of an envelope file that is ever rewritten in place.
//!
//! ## Layout (28 bytes, big-endian)
//! ```text
//! ┌───────────┬──────────────┬───────────┬───────────┬───────────┬─────────┬───────────┐
//! │ Start (2) │ Version (4)  │ Codec (2) │MetaLen (4)│DataLen (8)│ CRC (4) │  End (4)  │
//! │   "#~"    │   "SH01"     │   u16     │   u32     │   u64     │   u32   │ "~#\r\n"  │
//! └───────────┴──────────────┴───────────┴───────────┴───────────┴─────────┴───────────┘
//! ```
//! `DataLen == u64::MAX` means the data block is unbounded (rest of file).
//! The CRC covers bytes `0..20` so a torn tag rewrite is detected.

use crate::error::{Result, ShelfError};

use super::codec::MetaCodecKind;

/// Total tag size in bytes
pub const TAG_SIZE: usize = 28;

/// Marker at the start of every envelope file (cheap probe for directory scans)
pub const START_MARKER: &[u8; 2] = b"#~";

/// Marker closing the tag
pub const END_MARKER: &[u8; 4] = b"~#\r\n";

/// Current format version code
pub const VERSION: &[u8; 4] = b"SH01";

/// Data length sentinel for "unbounded / not yet known"
pub const UNBOUNDED: u64 = u64::MAX;

/// Offset of the CRC field (also the length of the checksummed prefix)
const CRC_OFFSET: usize = 20;

/// Decoded envelope tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    /// Codec that produced the meta block
    pub meta_codec: MetaCodecKind,
    /// Length of the meta block in bytes
    pub meta_length: u32,
    /// Length of the data block in bytes, `None` if unbounded
    pub data_length: Option<u64>,
}

impl Tag {
    pub fn new(meta_codec: MetaCodecKind, meta_length: u32, data_length: Option<u64>) -> Self {
        Self {
            meta_codec,
            meta_length,
            data_length,
        }
    }

    /// Offset of the data block from the start of the envelope
    pub fn data_offset(&self) -> u64 {
        TAG_SIZE as u64 + self.meta_length as u64
    }

    /// Copy of this tag with a different data length
    pub fn with_data_length(&self, data_length: Option<u64>) -> Self {
        Self {
            data_length,
            ..*self
        }
    }

    /// Encode the tag to its fixed binary form
    pub fn encode(&self) -> [u8; TAG_SIZE] {
        let mut buf = [0u8; TAG_SIZE];
        buf[0..2].copy_from_slice(START_MARKER);
        buf[2..6].copy_from_slice(VERSION);
        buf[6..8].copy_from_slice(&self.meta_codec.code().to_be_bytes());
        buf[8..12].copy_from_slice(&self.meta_length.to_be_bytes());
        buf[12..20].copy_from_slice(&self.data_length.unwrap_or(UNBOUNDED).to_be_bytes());

        let crc = crc32fast::hash(&buf[0..CRC_OFFSET]);
        buf[20..24].copy_from_slice(&crc.to_be_bytes());
        buf[24..28].copy_from_slice(END_MARKER);
        buf
    }

    /// Decode a tag from the first `TAG_SIZE` bytes of `bytes`
    ///
    /// Fails on short input, unknown markers, version or codec, and on a
    /// checksum mismatch.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < TAG_SIZE {
            return Err(ShelfError::Format(format!(
                "Tag too short: expected {} bytes, got {}",
                TAG_SIZE,
                bytes.len()
            )));
        }

        if &bytes[0..2] != START_MARKER || &bytes[24..28] != END_MARKER {
            return Err(ShelfError::Format("Missing envelope tag markers".to_string()));
        }

        if &bytes[2..6] != VERSION {
            return Err(ShelfError::Format(format!(
                "Unsupported envelope version: {:?}",
                String::from_utf8_lossy(&bytes[2..6])
            )));
        }

        let stored_crc = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        let computed_crc = crc32fast::hash(&bytes[0..CRC_OFFSET]);
        if stored_crc != computed_crc {
            return Err(ShelfError::Format(format!(
                "Tag checksum mismatch: stored {:08x}, computed {:08x}",
                stored_crc, computed_crc
            )));
        }

        let meta_codec = MetaCodecKind::from_code(u16::from_be_bytes([bytes[6], bytes[7]]))?;
        let meta_length = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

        let mut data_len_bytes = [0u8; 8];
        data_len_bytes.copy_from_slice(&bytes[12..20]);
        let data_length = match u64::from_be_bytes(data_len_bytes) {
            UNBOUNDED => None,
            n => Some(n),
        };

        Ok(Self {
            meta_codec,
            meta_length,
            data_length,
        })
    }

    /// Cheap check whether `bytes` start like an envelope
    pub fn probe(bytes: &[u8]) -> bool {
        bytes.len() >= 6 && &bytes[0..2] == START_MARKER && &bytes[2..6] == VERSION
    }
}
