//! Storage Manager
//!
//! Process-wide registry of root storages.
//!
//! ## Responsibilities
//! - Map backend names (`type` of a storage document) to constructors
//! - Build each root storage once: a document structurally equal to one
//!   already built returns the same instance
//! - Close every built storage on shutdown

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{StorageConfig, DEFAULT_BACKEND};
use crate::context::Context;
use crate::error::{Result, ShelfError};
use crate::meta::Meta;

use super::{FileStorage, Storage};

/// Builds a root storage for one backend
pub type StorageConstructor =
    Box<dyn Fn(&StorageConfig, Arc<Context>) -> Result<Arc<dyn Storage>> + Send + Sync>;

/// Registry of live root storages
///
/// ## Concurrency:
/// - `instances`: one mutex, held for the whole build so two equal
///   documents racing each other still produce one instance
/// - `backends`: fixed at construction
pub struct StorageManager {
    context: Arc<Context>,
    backends: BTreeMap<String, StorageConstructor>,
    instances: Mutex<Vec<(Meta, Arc<dyn Storage>)>>,
}

impl StorageManager {
    /// Manager with an explicit backend table
    pub fn new(context: Arc<Context>, backends: BTreeMap<String, StorageConstructor>) -> Self {
        Self {
            context,
            backends,
            instances: Mutex::new(Vec::new()),
        }
    }

    /// Manager knowing the directory backend as `"file"`
    pub fn with_default_backends(context: Arc<Context>) -> Self {
        let mut backends: BTreeMap<String, StorageConstructor> = BTreeMap::new();
        backends.insert(
            DEFAULT_BACKEND.to_string(),
            Box::new(|config: &StorageConfig, context: Arc<Context>| {
                let storage: Arc<dyn Storage> = FileStorage::open(config, context)?;
                Ok(storage)
            }),
        );
        Self::new(context, backends)
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Names of the registered backends
    pub fn backend_names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    /// Build the root storage described by `meta`, or return the instance
    /// already built from an equal document
    pub fn build_storage(&self, meta: &Meta) -> Result<Arc<dyn Storage>> {
        let mut instances = self.instances.lock();
        if let Some((_, storage)) = instances.iter().find(|(known, _)| known == meta) {
            return Ok(Arc::clone(storage));
        }

        let config = StorageConfig::from_meta(meta, self.context.config())?;
        let constructor = self.backends.get(&config.backend).ok_or_else(|| {
            ShelfError::Config(format!("Unknown storage type '{}'", config.backend))
        })?;
        let storage = constructor(&config, Arc::clone(&self.context))?;

        tracing::debug!(
            "Built {} storage at {}",
            config.backend,
            config.path.display()
        );
        instances.push((meta.clone(), Arc::clone(&storage)));
        Ok(storage)
    }

    /// Number of distinct storages built so far
    pub fn storage_count(&self) -> usize {
        self.instances.lock().len()
    }

    /// Close and forget every storage
    pub fn close_all(&self) {
        let instances = std::mem::take(&mut *self.instances.lock());
        for (_, storage) in instances {
            storage.close();
        }
        self.context.flush_notifications();
    }
}
