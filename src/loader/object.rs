//! Object loader
//!
//! A name → object map stored as one bincode block in the data block.
//! Every push or remove reads the whole map, changes one entry and replaces
//! the data block, so this kind suits a handful of small objects only.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, ShelfError};

use super::LoaderBase;

type ObjectMap = BTreeMap<String, Vec<u8>>;

/// Map of named serialized objects
pub struct ObjectLoader {
    base: LoaderBase,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl ObjectLoader {
    pub(super) fn new(base: LoaderBase) -> Self {
        Self {
            base,
            write_lock: Mutex::new(()),
        }
    }

    pub fn base(&self) -> &LoaderBase {
        &self.base
    }

    /// Store `object` under `name`, replacing any previous object
    pub fn push<T: Serialize>(&self, name: &str, object: &T) -> Result<()> {
        let bytes = bincode::serialize(object)?;
        let _guard = self.write_lock.lock();
        let mut map = self.read_map()?;
        map.insert(name.to_string(), bytes);
        self.write_map(&map)
    }

    /// Load the object stored under `name`
    pub fn pull<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.read_map()?.get(name) {
            Some(bytes) => Ok(Some(bincode::deserialize(bytes)?)),
            None => Ok(None),
        }
    }

    /// Stored object names in order
    pub fn names(&self) -> Result<Vec<String>> {
        Ok(self.read_map()?.into_keys().collect())
    }

    /// Remove an object; returns whether it existed
    pub fn remove(&self, name: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let mut map = self.read_map()?;
        if map.remove(name).is_none() {
            return Ok(false);
        }
        self.write_map(&map)?;
        Ok(true)
    }

    fn read_map(&self) -> Result<ObjectMap> {
        let data = self.base.envelope().data()?;
        if data.is_empty() {
            return Ok(ObjectMap::new());
        }
        bincode::deserialize(&data).map_err(|e| {
            ShelfError::Format(format!(
                "Corrupt object map in {}: {}",
                self.base.envelope().path().display(),
                e
            ))
        })
    }

    fn write_map(&self, map: &ObjectMap) -> Result<()> {
        let bytes = bincode::serialize(map)?;
        self.base.envelope().replace_data(&bytes)?;
        tracing::debug!(
            "Rewrote object map {} ({} objects)",
            self.base.name(),
            map.len()
        );
        Ok(())
    }
}
