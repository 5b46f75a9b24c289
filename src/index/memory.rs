//! In-memory sorted multi-map index
//!
//! Built by scanning every entry of a source and extracting a key from each.
//! `update()` is the only mutator; queries build the map on first use if
//! `update()` was never called.

use parking_lot::RwLock;

use crate::error::Result;
use crate::value::Value;

use super::{map_ceiling, map_exact, map_range, KeyMap, ValueIndex};

type Source<E> = Box<dyn Fn() -> Result<Vec<E>> + Send + Sync>;
type KeyExtractor<E> = Box<dyn Fn(&E) -> Value + Send + Sync>;

/// Sorted multi-map index over a re-scannable entry source
pub struct MemoryIndex<E> {
    source: Source<E>,
    key_of: KeyExtractor<E>,
    state: RwLock<Option<Built<E>>>,
}

struct Built<E> {
    entries: Vec<E>,
    /// key → positions in `entries`, in scan order
    map: KeyMap<usize>,
}

impl<E: Clone> MemoryIndex<E> {
    pub fn new<S, K>(source: S, key_of: K) -> Self
    where
        S: Fn() -> Result<Vec<E>> + Send + Sync + 'static,
        K: Fn(&E) -> Value + Send + Sync + 'static,
    {
        Self {
            source: Box::new(source),
            key_of: Box::new(key_of),
            state: RwLock::new(None),
        }
    }

    /// Rescan the source and rebuild the map
    ///
    /// Queries wait while an update holds the lock.
    pub fn update(&self) -> Result<()> {
        let mut state = self.state.write();
        let entries = (self.source)()?;
        let mut map = KeyMap::new();
        for (position, entry) in entries.iter().enumerate() {
            map.entry((self.key_of)(entry))
                .or_insert_with(Vec::new)
                .push(position);
        }
        tracing::trace!("Memory index rebuilt with {} entries", entries.len());
        *state = Some(Built { entries, map });
        Ok(())
    }

    /// Number of indexed entries (0 before the first update)
    pub fn len(&self) -> usize {
        self.state.read().as_ref().map(|b| b.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn query<T>(&self, f: impl FnOnce(&Built<E>) -> T) -> Result<T> {
        if self.state.read().is_none() {
            self.update()?;
        }
        let state = self.state.read();
        match state.as_ref() {
            Some(built) => Ok(f(built)),
            None => Err(crate::error::ShelfError::Index(
                "Memory index was not built".to_string(),
            )),
        }
    }
}

impl<E> Built<E>
where
    E: Clone,
{
    fn resolve(&self, positions: Vec<usize>) -> Vec<E> {
        positions
            .into_iter()
            .filter_map(|p| self.entries.get(p).cloned())
            .collect()
    }
}

impl<E: Clone> ValueIndex for MemoryIndex<E> {
    type Entry = E;

    fn pull(&self, key: &Value) -> Result<Vec<E>> {
        self.query(|b| b.resolve(map_exact(&b.map, key)))
    }

    fn pull_range(&self, from: &Value, to: &Value) -> Result<Vec<E>> {
        self.query(|b| b.resolve(map_range(&b.map, from, to)))
    }

    fn ceiling(&self, key: &Value) -> Result<Option<(Value, E)>> {
        self.query(|b| {
            map_ceiling(&b.map, key)
                .and_then(|(k, p)| b.entries.get(p).cloned().map(|e| (k, e)))
        })
    }

    fn key_set(&self) -> Result<Vec<Value>> {
        self.query(|b| b.map.keys().cloned().collect())
    }
}
