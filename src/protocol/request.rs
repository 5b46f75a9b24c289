//! Request definitions
//!
//! A request addresses one entity of the storage tree by dotted path.

use crate::error::{Result, ShelfError};
use crate::meta::Meta;

/// Kind of entity a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Storage,
    Loader,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Storage => "storage",
            TargetType::Loader => "loader",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "storage" | "shelf" => Ok(TargetType::Storage),
            "loader" => Ok(TargetType::Loader),
            other => Err(ShelfError::Protocol(format!("Unknown target type '{}'", other))),
        }
    }
}

/// A parsed request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub target_type: TargetType,
    /// Dotted path relative to the responding node; empty means the node
    /// itself (storage targets only)
    pub target_name: String,
    /// Create the target if it does not exist
    pub allow_create: bool,
    /// Configuration used when creating the target
    pub creation_meta: Meta,
}

impl Request {
    pub fn new(target_type: TargetType, target_name: impl Into<String>) -> Self {
        Self {
            target_type,
            target_name: target_name.into(),
            allow_create: false,
            creation_meta: Meta::new(),
        }
    }

    /// Allow creation of a missing target with `meta`
    pub fn create_with(mut self, meta: Meta) -> Self {
        self.allow_create = true;
        self.creation_meta = meta;
        self
    }

    /// Parse a request document
    ///
    /// ```text
    /// { targetType: "storage" | "loader", targetName, allowCreate?, creationMeta? }
    /// ```
    pub fn from_meta(meta: &Meta) -> Result<Self> {
        let target_type = meta
            .get_str("targetType")
            .ok_or_else(|| ShelfError::Protocol("Request has no 'targetType'".to_string()))?;
        Ok(Self {
            target_type: TargetType::parse(target_type)?,
            target_name: meta.get_str("targetName").unwrap_or_default().to_string(),
            allow_create: meta.get_bool("allowCreate").unwrap_or(false),
            creation_meta: meta.get_node("creationMeta").cloned().unwrap_or_default(),
        })
    }

    pub fn to_meta(&self) -> Meta {
        Meta::new()
            .with("targetType", self.target_type.as_str())
            .with("targetName", self.target_name.as_str())
            .with("allowCreate", self.allow_create)
            .with("creationMeta", self.creation_meta.clone())
    }
}
