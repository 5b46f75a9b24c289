//! Value Index Module
//!
//! Queryable views mapping an ordered [`Value`] key to stored entries.
//!
//! ## Index Shapes
//! - [`OrdinalIndex`]: key is the entry position; always fresh
//! - [`MemoryIndex`]: sorted multi-map built by a full scan on `update()`
//! - [`FileIndex`]: incremental index over the lines of an append-only
//!   envelope, with a persisted snapshot so restarts only scan new bytes
//!
//! ## Queries
//! - `pull(key)`: exact match
//! - `pull_range(from, to)`: inclusive range, ordered by key
//! - `pull_one(key)`: first entry with key >= `key`
//! - `key_set()`: distinct keys in order
//! - [`sparse_pull`]: at most `limit` entries spread over a numeric range

mod memory;
mod ordinal;
mod persisted;
mod sparse;

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::error::Result;
use crate::value::Value;

pub use memory::MemoryIndex;
pub use ordinal::OrdinalIndex;
pub use persisted::{is_content_line, FileIndex, COMMENT_MARKER};
pub use sparse::sparse_pull;

/// Common query contract of every index shape
pub trait ValueIndex {
    type Entry;

    /// All entries whose key equals `key`
    fn pull(&self, key: &Value) -> Result<Vec<Self::Entry>>;

    /// All entries with `from <= key <= to`, in key order
    fn pull_range(&self, from: &Value, to: &Value) -> Result<Vec<Self::Entry>>;

    /// First key >= `key` together with its first entry
    fn ceiling(&self, key: &Value) -> Result<Option<(Value, Self::Entry)>>;

    /// Distinct keys in ascending order
    fn key_set(&self) -> Result<Vec<Value>>;

    /// First entry with key >= `key`
    fn pull_one(&self, key: &Value) -> Result<Option<Self::Entry>> {
        Ok(self.ceiling(key)?.map(|(_, entry)| entry))
    }
}

// =============================================================================
// Shared multi-map helpers
// =============================================================================

/// Sorted multi-map: key → locators in insertion order
pub(crate) type KeyMap<L> = BTreeMap<Value, Vec<L>>;

pub(crate) fn map_exact<L: Clone>(map: &KeyMap<L>, key: &Value) -> Vec<L> {
    map.get(key).cloned().unwrap_or_default()
}

pub(crate) fn map_range<L: Clone>(map: &KeyMap<L>, from: &Value, to: &Value) -> Vec<L> {
    // BTreeMap::range panics on inverted bounds
    if from > to {
        return Vec::new();
    }
    map.range((Bound::Included(from), Bound::Included(to)))
        .flat_map(|(_, locators)| locators.iter().cloned())
        .collect()
}

pub(crate) fn map_ceiling<L: Clone>(map: &KeyMap<L>, key: &Value) -> Option<(Value, L)> {
    map.range((Bound::Included(key), Bound::Unbounded))
        .find_map(|(k, locators)| locators.first().map(|l| (k.clone(), l.clone())))
}
