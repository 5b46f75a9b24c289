//! Configuration for shelfdb
//!
//! Two layers:
//! - [`Config`]: engine settings with sensible defaults (builder pattern)
//! - [`StorageConfig`]: typed view of a storage configuration document
//!
//! ## Storage configuration document
//! ```text
//! type: "file"
//! path: <filesystem path, relative to the working directory>
//! readOnly: bool
//! monitor: bool
//! shelf: [ { name, ...nested storage config }, ... ]
//! loader: [ { name, type: table|state|object|event, format? }, ... ]
//! ```

use std::path::{Path, PathBuf};

use crate::envelope::MetaCodecKind;
use crate::error::{Result, ShelfError};
use crate::meta::Meta;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Filesystem
    // -------------------------------------------------------------------------
    /// Base directory for relative storage paths
    pub working_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Envelope Configuration
    // -------------------------------------------------------------------------
    /// Codec used for the meta block of newly created envelopes
    pub meta_codec: MetaCodecKind,

    /// fsync the data block after every append
    pub sync_on_append: bool,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Newly indexed bytes after which an index snapshot is persisted
    pub index_persist_threshold: u64,

    // -------------------------------------------------------------------------
    // Monitor Configuration
    // -------------------------------------------------------------------------
    /// Polling interval of directory monitors (milliseconds)
    pub monitor_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            meta_codec: MetaCodecKind::Json,
            sync_on_append: false,
            index_persist_threshold: 200,
            monitor_interval_ms: 1000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Resolve a possibly relative path against the working directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the working directory
    pub fn working_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.working_dir = path.into();
        self
    }

    /// Set the meta codec for new envelopes
    pub fn meta_codec(mut self, codec: MetaCodecKind) -> Self {
        self.config.meta_codec = codec;
        self
    }

    /// Enable or disable fsync after every append
    pub fn sync_on_append(mut self, sync: bool) -> Self {
        self.config.sync_on_append = sync;
        self
    }

    /// Set the index snapshot threshold (in bytes)
    pub fn index_persist_threshold(mut self, bytes: u64) -> Self {
        self.config.index_persist_threshold = bytes;
        self
    }

    /// Set the monitor polling interval (in milliseconds)
    pub fn monitor_interval_ms(mut self, ms: u64) -> Self {
        self.config.monitor_interval_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

/// Backend type used when a storage document does not name one
pub const DEFAULT_BACKEND: &str = "file";

/// Parsed storage configuration document
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Backend name (`type`)
    pub backend: String,
    /// Resolved storage directory
    pub path: PathBuf,
    pub read_only: bool,
    /// Keep the tree in sync with external file changes
    pub monitor: bool,
    /// Nested shelf declarations
    pub shelves: Vec<Meta>,
    /// Loader declarations
    pub loaders: Vec<Meta>,
    /// The document this was parsed from
    pub meta: Meta,
}

impl StorageConfig {
    /// Parse a storage document; relative paths resolve against `config`
    pub fn from_meta(meta: &Meta, config: &Config) -> Result<Self> {
        let path = meta
            .get_str("path")
            .ok_or_else(|| ShelfError::Config("Storage configuration has no 'path'".to_string()))?;

        Ok(Self {
            backend: meta.get_str("type").unwrap_or(DEFAULT_BACKEND).to_string(),
            path: config.resolve(Path::new(path)),
            read_only: meta.get_bool("readOnly").unwrap_or(false),
            monitor: meta.get_bool("monitor").unwrap_or(false),
            shelves: meta.get_nodes("shelf").into_iter().cloned().collect(),
            loaders: meta.get_nodes("loader").into_iter().cloned().collect(),
            meta: meta.clone(),
        })
    }

    /// Minimal document for a directory-backed storage at `path`
    pub fn file_meta(path: &Path) -> Meta {
        Meta::new()
            .with("type", DEFAULT_BACKEND)
            .with("path", path.to_string_lossy().to_string())
    }
}
