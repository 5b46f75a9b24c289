//! State loader
//!
//! A small document of named values and sub-documents kept under the
//! `state` item of the envelope meta. Every push rewrites the meta block.
//!
//! ## Staleness
//! The CRC32 of the raw meta bytes is remembered whenever the document is
//! read or written. If the bytes on disk hash differently, somebody else
//! changed the file and the cached document must not be trusted until
//! `reload()`.

use parking_lot::RwLock;

use crate::dispatch::{Listeners, Subscription};
use crate::error::{Result, ShelfError};
use crate::meta::{Meta, MetaItem};
use crate::value::Value;

use super::LoaderBase;

/// Meta item holding the state document
pub(crate) const STATE_ITEM: &str = "state";

/// Event delivered to state listeners after a successful push
#[derive(Debug, Clone)]
pub struct StateChanged {
    pub loader: String,
    pub path: String,
    pub item: MetaItem,
}

/// Mutable key/value document stored in the meta block
pub struct StateLoader {
    base: LoaderBase,
    cache: RwLock<Cached>,
    listeners: Listeners<StateChanged>,
}

struct Cached {
    document: Meta,
    hash: u32,
}

impl StateLoader {
    pub(super) fn new(base: LoaderBase) -> Result<Self> {
        let cached = read_cached(&base)?;
        Ok(Self {
            base,
            cache: RwLock::new(cached),
            listeners: Listeners::new(),
        })
    }

    pub fn base(&self) -> &LoaderBase {
        &self.base
    }

    /// The whole cached document
    pub fn document(&self) -> Meta {
        self.cache.read().document.clone()
    }

    pub fn get_value(&self, path: &str) -> Option<Value> {
        self.cache.read().document.get_value(path).cloned()
    }

    pub fn get_meta(&self, path: &str) -> Option<Meta> {
        self.cache.read().document.get_node(path).cloned()
    }

    pub fn push_value(&self, path: &str, value: impl Into<Value>) -> Result<()> {
        self.push(path, MetaItem::Value(value.into()))
    }

    pub fn push_meta(&self, path: &str, meta: Meta) -> Result<()> {
        self.push(path, MetaItem::Node(meta))
    }

    /// True if the meta block on disk differs from what was last read or
    /// written through this loader
    pub fn is_stale(&self) -> Result<bool> {
        let hash = crc32fast::hash(&self.base.envelope().raw_meta()?);
        Ok(hash != self.cache.read().hash)
    }

    /// Drop the cached document and read it again from disk
    pub fn reload(&self) -> Result<()> {
        self.base.envelope().refresh()?;
        let cached = read_cached(&self.base)?;
        *self.cache.write() = cached;
        tracing::debug!("Reloaded state {}", self.base.name());
        Ok(())
    }

    /// Register a listener for state changes
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StateChanged) -> Result<()> + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    fn push(&self, path: &str, item: MetaItem) -> Result<()> {
        if path.is_empty() {
            return Err(ShelfError::Config("Empty state path".to_string()));
        }
        let envelope = self.base.envelope();

        let mut cache = self.cache.write();
        let mut document = cache.document.clone();
        document.set(path, item.clone());

        let mut stored = envelope.meta()?;
        stored.set(STATE_ITEM, document.clone());
        envelope.set_meta(&stored)?;

        cache.hash = crc32fast::hash(&envelope.raw_meta()?);
        cache.document = document;
        drop(cache);

        self.listeners.notify(
            self.base.context().dispatcher(),
            StateChanged {
                loader: self.base.name().to_string(),
                path: path.to_string(),
                item,
            },
        );
        Ok(())
    }
}

fn read_cached(base: &LoaderBase) -> Result<Cached> {
    let envelope = base.envelope();
    let hash = crc32fast::hash(&envelope.raw_meta()?);
    let document = envelope
        .meta()?
        .get_node(STATE_ITEM)
        .cloned()
        .unwrap_or_default();
    Ok(Cached { document, hash })
}
