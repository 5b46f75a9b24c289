//! Error types for shelfdb
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using ShelfError
pub type Result<T> = std::result::Result<T, ShelfError>;

/// Unified error type for shelfdb operations
#[derive(Debug, Error)]
pub enum ShelfError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Envelope Errors
    // -------------------------------------------------------------------------
    #[error("Envelope format error: {0}")]
    Format(String),

    #[error("Envelope is read-only: {}", .0.display())]
    ReadOnly(PathBuf),

    #[error("Envelope is closed: {}", .0.display())]
    Closed(PathBuf),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Row does not match table format: {0}")]
    Schema(String),

    // -------------------------------------------------------------------------
    // Storage Tree Errors
    // -------------------------------------------------------------------------
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration conflict: {0}")]
    Conflict(String),

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    #[error("Index error: {0}")]
    Index(String),

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ShelfError {
    /// Stable short name of the error class, used in structured responses
    pub fn kind(&self) -> &'static str {
        match self {
            ShelfError::Io(_) => "io",
            ShelfError::Format(_) => "format",
            ShelfError::ReadOnly(_) => "read_only",
            ShelfError::Closed(_) => "closed",
            ShelfError::Serialization(_) => "serialization",
            ShelfError::Schema(_) => "schema",
            ShelfError::NotFound(_) => "not_found",
            ShelfError::Conflict(_) => "conflict",
            ShelfError::Index(_) => "index",
            ShelfError::Protocol(_) => "protocol",
            ShelfError::Config(_) => "config",
        }
    }
}

impl From<bincode::Error> for ShelfError {
    fn from(e: bincode::Error) -> Self {
        ShelfError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for ShelfError {
    fn from(e: serde_json::Error) -> Self {
        ShelfError::Serialization(e.to_string())
    }
}
