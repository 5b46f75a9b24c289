//! # shelfdb
//!
//! A hierarchical storage engine for instrument data with:
//! - Self-describing envelope files (tag + meta + append-only data)
//! - A tree of shelves (directories) and typed loaders (files)
//! - Value indices with incremental, persisted rescans
//! - Background listener dispatch for row, state and tree events
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageManager                           │
//! │            (backend table, one root per config)              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                  Storage tree (shelves)                      │
//! │          build / resolve "a.b.c", refresh, respond           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!     ┌─────────────┬───┴─────────┬─────────────┐
//!     ▼             ▼             ▼             ▼
//! ┌────────┐   ┌────────┐   ┌─────────┐   ┌─────────┐
//! │ Table  │   │ State  │   │ Object  │   │  Event  │   loaders
//! └───┬────┘   └───┬────┘   └────┬────┘   └────┬────┘
//!     │            │             │             │
//!     ▼            ▼             ▼             ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 FileEnvelope (one per loader)                │
//! └─────────────────────────────────────────────────────────────┘
//!     ▲
//!     │ lines
//! ┌───┴─────────┐
//! │ Value index │  (ordinal / memory / persisted incremental)
//! └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod context;
pub mod dispatch;

pub mod value;
pub mod meta;
pub mod envelope;
pub mod index;
pub mod table;
pub mod loader;
pub mod storage;
pub mod protocol;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, ShelfError};
pub use config::{Config, StorageConfig};
pub use context::Context;
pub use envelope::{Envelope, FileEnvelope, MetaCodecKind};
pub use index::{sparse_pull, ValueIndex};
pub use loader::{Loader, LoaderKind};
pub use meta::{Meta, MetaItem};
pub use storage::{FileStorage, Storage, StorageManager, TreeEvent};
pub use table::{Row, TableFormat};
pub use value::{Value, ValueType};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of shelfdb
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
