//! Loader Module
//!
//! Leaf storage nodes. Every loader owns exactly one file envelope; its kind
//! (the `type` item of its meta) decides which behavior wraps the envelope.
//!
//! ## Kinds
//! | kind     | extension  | payload                                       |
//! |----------|------------|-----------------------------------------------|
//! | `table`  | `.table`   | rows appended as text lines (data block)       |
//! | `state`  | `.state`   | small mutable document (meta block)            |
//! | `object` | `.objects` | name → serialized object map (data block)      |
//! | `event`  | `.events`  | appended nested envelopes (data block)         |

mod event;
mod object;
mod state;
mod table;

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::Context;
use crate::envelope::FileEnvelope;
use crate::error::{Result, ShelfError};
use crate::meta::Meta;
use crate::value::Value;

pub use event::{EventIter, EventLoader};
pub use object::ObjectLoader;
pub use state::{StateChanged, StateLoader};
pub use table::{RowIter, RowPushed, TableLoader};

/// Directory (inside a shelf) holding index snapshots
pub const CACHE_DIR: &str = ".cache";

/// Closed set of loader kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderKind {
    Table,
    State,
    Object,
    Event,
}

impl LoaderKind {
    pub const ALL: [LoaderKind; 4] = [
        LoaderKind::Table,
        LoaderKind::State,
        LoaderKind::Object,
        LoaderKind::Event,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoaderKind::Table => "table",
            LoaderKind::State => "state",
            LoaderKind::Object => "object",
            LoaderKind::Event => "event",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| ShelfError::Config(format!("Unknown loader type '{}'", name)))
    }

    /// File extension of this kind (without the dot)
    pub fn extension(&self) -> &'static str {
        match self {
            LoaderKind::Table => "table",
            LoaderKind::State => "state",
            LoaderKind::Object => "objects",
            LoaderKind::Event => "events",
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.extension() == extension)
    }
}

// =============================================================================
// Shared Loader State
// =============================================================================

/// What every loader kind carries
pub struct LoaderBase {
    name: String,
    kind: LoaderKind,
    /// Creation-time configuration
    config: Meta,
    envelope: Arc<FileEnvelope>,
    context: Arc<Context>,
    cache_dir: PathBuf,
}

impl LoaderBase {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LoaderKind {
        self.kind
    }

    pub fn config(&self) -> &Meta {
        &self.config
    }

    pub fn envelope(&self) -> &Arc<FileEnvelope> {
        &self.envelope
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Delete every index snapshot of this loader (`<name>.*` in the cache
    /// directory), including ones written by earlier processes
    pub(crate) fn delete_snapshots(&self) {
        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!("Failed to list {}: {}", self.cache_dir.display(), e);
                return;
            }
        };

        let prefix = format!("{}.", self.name);
        for entry in entries.flatten() {
            if !entry.file_name().to_string_lossy().starts_with(&prefix) {
                continue;
            }
            let path = entry.path();
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!("Deleted index snapshot {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    "Failed to delete index snapshot {}: {}",
                    path.display(),
                    e
                ),
            }
        }
    }

    /// Creation config layered over the meta stored in the envelope
    pub fn meta(&self) -> Result<Meta> {
        Ok(self.config.overlay(&self.envelope.meta()?))
    }
}

/// Meta items that belong to loader payloads, not to their configuration
const RESERVED_ITEMS: [&str; 1] = [state::STATE_ITEM];

/// Normalize a loader declaration: fix its `name` and check its `type`
pub fn loader_config(name: &str, meta: &Meta) -> Result<(LoaderKind, Meta)> {
    let kind = match meta.get_str("type") {
        Some(kind) => LoaderKind::parse(kind)?,
        None => {
            return Err(ShelfError::Config(format!(
                "Loader '{}' declares no 'type'",
                name
            )))
        }
    };
    let mut config = meta.clone().with("name", name);
    for item in RESERVED_ITEMS {
        config.remove(item);
    }
    Ok((kind, config))
}

// =============================================================================
// Loader Family
// =============================================================================

/// A live loader of any kind
pub enum Loader {
    Table(TableLoader),
    State(StateLoader),
    Object(ObjectLoader),
    Event(EventLoader),
}

impl Loader {
    /// Create the backing file for a new loader in `dir`
    ///
    /// `meta` must carry a valid `type`; the file is `<dir>/<name>.<ext>`.
    pub fn create(dir: &Path, name: &str, meta: &Meta, context: Arc<Context>) -> Result<Self> {
        let (kind, config) = loader_config(name, meta)?;
        if kind == LoaderKind::Table {
            // fail before touching the filesystem
            crate::table::TableFormat::from_meta(&config)?;
        }

        let path = dir.join(format!("{}.{}", name, kind.extension()));
        let envelope = FileEnvelope::create(&path, &config, context.config().meta_codec)?
            .with_sync_on_append(context.config().sync_on_append);
        tracing::info!("Created {} loader {}", kind.as_str(), path.display());

        Self::wrap(kind, name, config, envelope, dir, context)
    }

    /// Open an existing loader file; its kind comes from the stored meta
    pub fn open(path: &Path, read_only: bool, context: Arc<Context>) -> Result<Self> {
        let envelope = FileEnvelope::open(path, read_only)?
            .with_sync_on_append(context.config().sync_on_append);
        let stored = envelope.meta()?;

        let name = match stored.get_str("name") {
            Some(name) => name.to_string(),
            None => path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .ok_or_else(|| ShelfError::Format(format!("Bad loader path {}", path.display())))?,
        };
        let mut declared = stored.clone();
        if declared.get_str("type").is_none() {
            let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
            let kind = LoaderKind::from_extension(extension).ok_or_else(|| {
                ShelfError::Format(format!("Cannot tell loader type of {}", path.display()))
            })?;
            declared.set("type", kind.as_str());
        }
        let (kind, config) = loader_config(&name, &declared)?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::wrap(kind, &name, config, envelope, dir, context)
    }

    fn wrap(
        kind: LoaderKind,
        name: &str,
        config: Meta,
        envelope: FileEnvelope,
        dir: &Path,
        context: Arc<Context>,
    ) -> Result<Self> {
        let base = LoaderBase {
            name: name.to_string(),
            kind,
            config,
            envelope: Arc::new(envelope),
            context,
            cache_dir: dir.join(CACHE_DIR),
        };
        Ok(match kind {
            LoaderKind::Table => Loader::Table(TableLoader::new(base)?),
            LoaderKind::State => Loader::State(StateLoader::new(base)?),
            LoaderKind::Object => Loader::Object(ObjectLoader::new(base)),
            LoaderKind::Event => Loader::Event(EventLoader::new(base)),
        })
    }

    pub fn base(&self) -> &LoaderBase {
        match self {
            Loader::Table(l) => l.base(),
            Loader::State(l) => l.base(),
            Loader::Object(l) => l.base(),
            Loader::Event(l) => l.base(),
        }
    }

    pub fn name(&self) -> &str {
        self.base().name()
    }

    pub fn kind(&self) -> LoaderKind {
        self.base().kind()
    }

    /// Creation-time configuration (compared when the loader is rebuilt)
    pub fn config(&self) -> &Meta {
        self.base().config()
    }

    /// Effective meta: configuration over stored meta
    pub fn meta(&self) -> Result<Meta> {
        self.base().meta()
    }

    pub fn path(&self) -> &Path {
        self.base().envelope().path()
    }

    pub fn is_read_only(&self) -> bool {
        self.base().envelope().is_read_only()
    }

    pub fn as_table(&self) -> Option<&TableLoader> {
        match self {
            Loader::Table(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_state(&self) -> Option<&StateLoader> {
        match self {
            Loader::State(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectLoader> {
        match self {
            Loader::Object(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&EventLoader> {
        match self {
            Loader::Event(l) => Some(l),
            _ => None,
        }
    }

    /// Summary used by request responses
    pub fn describe(&self) -> Result<Meta> {
        Ok(Meta::new()
            .with("name", self.name())
            .with("type", self.kind().as_str())
            .with("meta", self.meta()?)
            .with(
                "dataLength",
                Value::from(self.base().envelope().data_length()? as f64),
            ))
    }

    /// Release the file handle
    pub fn close(&self) {
        self.base().envelope().close();
    }

    /// Close and delete the backing file together with its index snapshots
    pub fn delete(&self) -> Result<()> {
        self.close();
        fs::remove_file(self.path())?;
        self.base().delete_snapshots();
        tracing::info!("Deleted loader {}", self.path().display());
        Ok(())
    }
}
