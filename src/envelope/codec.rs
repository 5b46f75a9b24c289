//! Meta codecs
//!
//! The meta block of an envelope is written by one of several codecs; the tag
//! records which one so envelopes with different encodings can coexist.

use serde_json::Value as JsonValue;

use crate::error::{Result, ShelfError};
use crate::meta::Meta;

/// Encoder/decoder for envelope meta blocks
pub trait MetaCodec: Send + Sync {
    /// Code stored in the tag
    fn code(&self) -> u16;

    /// Human-readable codec name
    fn name(&self) -> &'static str;

    fn encode(&self, meta: &Meta) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Meta>;
}

/// Human-readable JSON meta
pub struct JsonMetaCodec;

impl MetaCodec for JsonMetaCodec {
    fn code(&self) -> u16 {
        1
    }

    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, meta: &Meta) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&meta.to_json())?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Meta> {
        if bytes.is_empty() {
            return Ok(Meta::new());
        }
        let json: JsonValue = serde_json::from_slice(bytes)?;
        Meta::from_json(&json)
    }
}

/// Compact bincode meta (preserves value types exactly)
pub struct BinaryMetaCodec;

impl MetaCodec for BinaryMetaCodec {
    fn code(&self) -> u16 {
        2
    }

    fn name(&self) -> &'static str {
        "binary"
    }

    fn encode(&self, meta: &Meta) -> Result<Vec<u8>> {
        Ok(bincode::serialize(meta)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Meta> {
        if bytes.is_empty() {
            return Ok(Meta::new());
        }
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Closed set of registered meta codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaCodecKind {
    Json,
    Binary,
}

impl MetaCodecKind {
    pub fn code(&self) -> u16 {
        self.codec().code()
    }

    pub fn from_code(code: u16) -> Result<Self> {
        [MetaCodecKind::Json, MetaCodecKind::Binary]
            .into_iter()
            .find(|kind| kind.code() == code)
            .ok_or_else(|| ShelfError::Format(format!("Unknown meta codec code: {}", code)))
    }

    /// Look a codec up by its name (`json` or `binary`)
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "json" => Ok(MetaCodecKind::Json),
            "binary" => Ok(MetaCodecKind::Binary),
            other => Err(ShelfError::Config(format!("Unknown meta codec '{}'", other))),
        }
    }

    pub fn codec(&self) -> &'static dyn MetaCodec {
        match self {
            MetaCodecKind::Json => &JsonMetaCodec,
            MetaCodecKind::Binary => &BinaryMetaCodec,
        }
    }
}
