//! Storage Module
//!
//! The storage tree: shelves (inner nodes) holding loaders (leaves).
//!
//! ## Tree Layout (directory backend)
//! ```text
//! root/                       ← root shelf
//! ├── shelf.meta              ← meta-only envelope of the shelf
//! ├── .cache/                 ← index snapshots (never a child)
//! ├── temperature.table       ← loader "temperature"
//! └── run1/                   ← shelf "run1"
//!     ├── shelf.meta
//!     ├── settings.state      ← loader "run1.settings"
//!     └── log.events          ← loader "run1.log"
//! ```
//!
//! ## Paths
//! A dotted name (`"a.b.c"`) is always a path through nested shelves, never
//! a literal name. Building a loader or shelf at a path creates the missing
//! intermediate shelves with an empty configuration.
//!
//! ## Conflicts
//! Shelves and loaders share one namespace per node. Building an entity that
//! already exists returns it if its configuration is structurally equal to
//! the requested one, and fails with a conflict otherwise.

mod file;
mod manager;
mod monitor;

use std::sync::Arc;

use crate::dispatch::{Listener, Subscription};
use crate::error::{Result, ShelfError};
use crate::loader::Loader;
use crate::meta::Meta;
use crate::protocol::Response;

pub use file::{FileStorage, SHELF_META_FILE};
pub use manager::{StorageConstructor, StorageManager};

/// A node of the storage tree
pub trait Storage: Send + Sync {
    /// Name of this node; the root is named after its directory
    fn name(&self) -> &str;

    /// Dotted path from the root (empty for the root)
    fn full_name(&self) -> String;

    /// Configuration of this node
    fn meta(&self) -> Meta;

    fn is_read_only(&self) -> bool;

    /// Names of the direct child shelves, in order
    fn shelf_names(&self) -> Vec<String>;

    /// Names of the direct child loaders, in order
    fn loader_names(&self) -> Vec<String>;

    /// Resolve a shelf by (possibly dotted) path
    fn get_shelf(&self, path: &str) -> Option<Arc<dyn Storage>>;

    /// Resolve a loader by (possibly dotted) path
    fn get_loader(&self, path: &str) -> Option<Arc<Loader>>;

    /// Get or create a shelf
    fn build_shelf(&self, path: &str, meta: &Meta) -> Result<Arc<dyn Storage>>;

    /// Get or create a loader; `meta` must declare its `type`
    fn build_loader(&self, path: &str, meta: &Meta) -> Result<Arc<Loader>>;

    /// Close and delete a loader
    fn remove_loader(&self, path: &str) -> Result<()>;

    /// Close and delete a shelf with everything below it
    fn remove_shelf(&self, path: &str) -> Result<()>;

    /// Bring the in-memory tree in line with what is stored
    fn refresh(&self) -> Result<()>;

    /// Listen to children added to or removed from this node or any node
    /// below it
    fn subscribe(&self, listener: Listener<TreeEvent>) -> Subscription;

    /// Stop monitoring and release every file handle in this subtree
    fn close(&self);

    /// Answer a request document; failures become error responses
    fn respond(&self, request: &Meta) -> Response;
}

/// Structural change of the storage tree
///
/// `path` is the dotted path of the affected child from the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    ShelfAdded { path: String },
    ShelfRemoved { path: String },
    LoaderAdded { path: String },
    LoaderRemoved { path: String },
}

impl TreeEvent {
    pub fn path(&self) -> &str {
        match self {
            TreeEvent::ShelfAdded { path }
            | TreeEvent::ShelfRemoved { path }
            | TreeEvent::LoaderAdded { path }
            | TreeEvent::LoaderRemoved { path } => path,
        }
    }
}

// =============================================================================
// Path Helpers
// =============================================================================

/// Split a dotted path into its first segment and the remainder
pub(crate) fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.split_once(crate::meta::PATH_SEPARATOR) {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    }
}

/// Join a parent path and a child name
pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", parent, crate::meta::PATH_SEPARATOR, name)
    }
}

/// Check a single path segment
///
/// Names map onto file names, so separators and dot-prefixed names (hidden
/// entries such as `.cache`) are rejected.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains(crate::meta::PATH_SEPARATOR)
        || name.contains(['/', '\\'])
        || name == SHELF_META_FILE;
    if bad {
        return Err(ShelfError::Config(format!("Invalid storage name '{}'", name)));
    }
    Ok(())
}

