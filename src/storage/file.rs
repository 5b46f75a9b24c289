//! Directory-backed storage
//!
//! Each shelf is a directory, each loader a file whose extension names its
//! kind. A shelf's own configuration is kept in a meta-only envelope named
//! [`SHELF_META_FILE`].
//!
//! ## Scanning
//! `refresh()` lists the directory and reconciles the child maps with it:
//! 1. Entries starting with `.` and the shelf meta file are ignored
//! 2. Sub-directories become shelves (scanned recursively)
//! 3. Files with a loader extension that probe as envelopes become loaders
//! 4. Children whose directory or file disappeared are closed and dropped
//!
//! Every change is reported as a [`TreeEvent`] to listeners of the node and
//! of all its ancestors.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::StorageConfig;
use crate::context::Context;
use crate::dispatch::{Listener, Listeners, Subscription};
use crate::envelope::FileEnvelope;
use crate::error::{Result, ShelfError};
use crate::loader::{loader_config, Loader, LoaderKind};
use crate::meta::Meta;
use crate::protocol::Response;

use super::monitor::Monitor;
use super::{join_path, split_path, validate_name, Storage, TreeEvent};

/// File holding a shelf's configuration inside its directory
pub const SHELF_META_FILE: &str = "shelf.meta";

/// Items of a shelf declaration that describe its children, not the shelf
const DECLARATION_ITEMS: [&str; 2] = ["shelf", "loader"];

/// A shelf backed by a directory
pub struct FileStorage {
    name: String,
    full_name: String,
    dir: PathBuf,
    meta: Meta,
    read_only: bool,
    context: Arc<Context>,
    parent: Option<Weak<FileStorage>>,
    this: Weak<FileStorage>,
    /// Child maps; one lock per node guards create, remove and refresh
    children: Mutex<Children>,
    listeners: Listeners<TreeEvent>,
    monitor: Mutex<Option<Monitor>>,
    closed: AtomicBool,
}

#[derive(Default)]
struct Children {
    shelves: BTreeMap<String, Arc<FileStorage>>,
    loaders: BTreeMap<String, Arc<Loader>>,
}

impl FileStorage {
    /// Open (or create) a root storage and build everything it declares
    ///
    /// On open:
    /// 1. Create the directory unless read-only
    /// 2. Scan existing shelves and loaders
    /// 3. Build the declared shelves and loaders
    /// 4. Start the monitor if requested
    pub fn open(config: &StorageConfig, context: Arc<Context>) -> Result<Arc<Self>> {
        if !config.path.is_dir() {
            if config.read_only {
                return Err(ShelfError::NotFound(format!(
                    "Storage directory {}",
                    config.path.display()
                )));
            }
            fs::create_dir_all(&config.path)?;
        }

        let name = match config.meta.get_str("name") {
            Some(name) => name.to_string(),
            None => config
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "root".to_string()),
        };

        let root = Self::node(
            name,
            String::new(),
            config.path.clone(),
            config.meta.clone(),
            config.read_only,
            context,
            None,
        );
        root.scan()?;
        root.apply_declarations(&config.shelves, &config.loaders)?;
        if config.monitor {
            root.start_monitor()?;
        }

        tracing::info!(
            "Opened storage '{}' at {} ({} shelves, {} loaders)",
            root.name,
            root.dir.display(),
            root.shelf_names().len(),
            root.loader_names().len()
        );
        Ok(root)
    }

    /// Directory backing this shelf
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn node(
        name: String,
        full_name: String,
        dir: PathBuf,
        meta: Meta,
        read_only: bool,
        context: Arc<Context>,
        parent: Option<Weak<FileStorage>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name,
            full_name,
            dir,
            meta,
            read_only,
            context,
            parent,
            this: this.clone(),
            children: Mutex::new(Children::default()),
            listeners: Listeners::new(),
            monitor: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    fn child_node(&self, name: &str, meta: Meta) -> Arc<Self> {
        Self::node(
            name.to_string(),
            join_path(&self.full_name, name),
            self.dir.join(name),
            meta,
            self.read_only,
            Arc::clone(&self.context),
            Some(self.this.clone()),
        )
    }

    fn start_monitor(&self) -> Result<()> {
        let storage: Weak<dyn Storage> = self.this.clone();
        let interval = Duration::from_millis(self.context.config().monitor_interval_ms);
        let monitor = Monitor::start(storage, interval)?;
        *self.monitor.lock() = Some(monitor);
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ShelfError::Closed(self.dir.clone()));
        }
        Ok(())
    }

    fn check_writable(&self, path: PathBuf) -> Result<()> {
        if self.read_only {
            return Err(ShelfError::ReadOnly(path));
        }
        Ok(())
    }

    /// Report a change here and to every ancestor
    fn emit(&self, event: TreeEvent) {
        self.listeners.notify(self.context.dispatcher(), event.clone());
        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            parent.emit(event);
        }
    }

    // =========================================================================
    // Declarations
    // =========================================================================

    fn apply_declarations(&self, shelves: &[Meta], loaders: &[Meta]) -> Result<()> {
        for declaration in loaders {
            self.build_loader(declared_name(declaration)?, declaration)?;
        }
        for declaration in shelves {
            let shelf = self.ensure_shelf(declared_name(declaration)?, Some(declaration))?;
            let nested: Vec<Meta> = declaration.get_nodes("shelf").into_iter().cloned().collect();
            let loaders: Vec<Meta> = declaration.get_nodes("loader").into_iter().cloned().collect();
            shelf.apply_declarations(&nested, &loaders)?;
        }
        Ok(())
    }

    // =========================================================================
    // Shelves
    // =========================================================================

    fn resolve_shelf(&self, path: &str) -> Option<Arc<FileStorage>> {
        let (head, rest) = split_path(path);
        let shelf = self.children.lock().shelves.get(head).cloned()?;
        match rest {
            Some(rest) => shelf.resolve_shelf(rest),
            None => Some(shelf),
        }
    }

    /// Get or create the shelf at `path`
    ///
    /// Intermediate shelves are created with an empty configuration. With
    /// `meta == None` any existing configuration of the last shelf is
    /// accepted.
    fn ensure_shelf(&self, path: &str, meta: Option<&Meta>) -> Result<Arc<FileStorage>> {
        match split_path(path) {
            (head, Some(rest)) => self.local_shelf(head, None)?.ensure_shelf(rest, meta),
            (name, None) => self.local_shelf(name, meta),
        }
    }

    fn local_shelf(&self, name: &str, meta: Option<&Meta>) -> Result<Arc<FileStorage>> {
        validate_name(name)?;
        self.check_open()?;
        let empty = Meta::new();
        let requested = shelf_config(name, meta.unwrap_or(&empty));

        let mut children = self.children.lock();
        if let Some(shelf) = children.shelves.get(name) {
            if meta.is_some() && shelf.meta != requested {
                return Err(self.conflict("Shelf", name));
            }
            return Ok(Arc::clone(shelf));
        }
        if children.loaders.contains_key(name) {
            return Err(ShelfError::Conflict(format!(
                "'{}' in '{}' is already a loader",
                name, self.name
            )));
        }

        let dir = self.dir.join(name);
        let shelf = if dir.is_dir() {
            // created behind our back and not scanned yet
            let shelf = self.open_child_shelf(name)?;
            if meta.is_some() && shelf.meta != requested {
                return Err(self.conflict("Shelf", name));
            }
            shelf
        } else {
            self.check_writable(dir.clone())?;
            fs::create_dir_all(&dir)?;
            FileEnvelope::create(
                &dir.join(SHELF_META_FILE),
                &requested,
                self.context.config().meta_codec,
            )?;
            tracing::info!("Created shelf {}", dir.display());
            self.child_node(name, requested)
        };

        children.shelves.insert(name.to_string(), Arc::clone(&shelf));
        drop(children);
        self.emit(TreeEvent::ShelfAdded {
            path: shelf.full_name.clone(),
        });
        Ok(shelf)
    }

    /// Open an existing sub-directory as a shelf and scan it
    fn open_child_shelf(&self, name: &str) -> Result<Arc<FileStorage>> {
        let meta_path = self.dir.join(name).join(SHELF_META_FILE);
        let stored = if meta_path.is_file() {
            FileEnvelope::open(&meta_path, true)?.meta()?
        } else {
            Meta::new()
        };
        let shelf = self.child_node(name, shelf_config(name, &stored));
        shelf.scan()?;
        Ok(shelf)
    }

    fn remove_local_shelf(&self, name: &str) -> Result<()> {
        self.check_open()?;
        self.check_writable(self.dir.join(name))?;
        let shelf = self
            .children
            .lock()
            .shelves
            .remove(name)
            .ok_or_else(|| self.not_found("Shelf", name))?;

        shelf.close();
        fs::remove_dir_all(&shelf.dir)?;
        tracing::info!("Removed shelf {}", shelf.dir.display());
        self.emit(TreeEvent::ShelfRemoved {
            path: shelf.full_name.clone(),
        });
        Ok(())
    }

    // =========================================================================
    // Loaders
    // =========================================================================

    fn local_loader(&self, name: &str, meta: &Meta) -> Result<Arc<Loader>> {
        validate_name(name)?;
        self.check_open()?;
        let (kind, config) = loader_config(name, meta)?;

        let mut children = self.children.lock();
        if let Some(loader) = children.loaders.get(name) {
            if loader.config() != &config {
                return Err(self.conflict("Loader", name));
            }
            return Ok(Arc::clone(loader));
        }
        if children.shelves.contains_key(name) {
            return Err(ShelfError::Conflict(format!(
                "'{}' in '{}' is already a shelf",
                name, self.name
            )));
        }

        let path = self.dir.join(format!("{}.{}", name, kind.extension()));
        let loader = if path.exists() {
            let loader = Loader::open(&path, self.read_only, Arc::clone(&self.context))?;
            if loader.config() != &config {
                return Err(self.conflict("Loader", name));
            }
            loader
        } else {
            self.check_writable(path)?;
            Loader::create(&self.dir, name, meta, Arc::clone(&self.context))?
        };

        let loader = Arc::new(loader);
        children.loaders.insert(name.to_string(), Arc::clone(&loader));
        drop(children);
        self.emit(TreeEvent::LoaderAdded {
            path: join_path(&self.full_name, name),
        });
        Ok(loader)
    }

    fn remove_local_loader(&self, name: &str) -> Result<()> {
        self.check_open()?;
        self.check_writable(self.dir.join(name))?;
        let loader = self
            .children
            .lock()
            .loaders
            .remove(name)
            .ok_or_else(|| self.not_found("Loader", name))?;

        loader.delete()?;
        self.emit(TreeEvent::LoaderRemoved {
            path: join_path(&self.full_name, name),
        });
        Ok(())
    }

    // =========================================================================
    // Directory Scan
    // =========================================================================

    fn scan(&self) -> Result<()> {
        self.check_open()?;

        // Step 1: list the directory
        let mut dirs = BTreeSet::new();
        let mut files = BTreeSet::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.starts_with('.') || file_name == SHELF_META_FILE {
                continue;
            }
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                dirs.insert(file_name);
            } else if file_type.is_file() && is_loader_file(&entry.path()) {
                files.insert(entry.path());
            }
        }

        // Step 2: reconcile the child maps
        let mut events = Vec::new();
        let mut children = self.children.lock();

        let gone: Vec<String> = children
            .shelves
            .keys()
            .filter(|name| !dirs.contains(*name))
            .cloned()
            .collect();
        for name in gone {
            if let Some(shelf) = children.shelves.remove(&name) {
                shelf.close();
                events.push(TreeEvent::ShelfRemoved {
                    path: shelf.full_name.clone(),
                });
            }
        }

        let gone: Vec<String> = children
            .loaders
            .iter()
            .filter(|(_, loader)| !files.contains(loader.path()))
            .map(|(name, _)| name.clone())
            .collect();
        for name in gone {
            if let Some(loader) = children.loaders.remove(&name) {
                loader.close();
                events.push(TreeEvent::LoaderRemoved {
                    path: join_path(&self.full_name, &name),
                });
            }
        }

        let known: BTreeSet<PathBuf> = children
            .loaders
            .values()
            .map(|loader| loader.path().to_path_buf())
            .collect();
        for path in files.iter().filter(|path| !known.contains(*path)) {
            match Loader::open(path, self.read_only, Arc::clone(&self.context)) {
                Ok(loader) => {
                    let name = loader.name().to_string();
                    if children.loaders.contains_key(&name) || dirs.contains(&name) {
                        tracing::warn!(
                            "Skipping {}: name '{}' is already taken",
                            path.display(),
                            name
                        );
                        continue;
                    }
                    events.push(TreeEvent::LoaderAdded {
                        path: join_path(&self.full_name, &name),
                    });
                    children.loaders.insert(name, Arc::new(loader));
                }
                Err(e) => tracing::warn!("Skipping unreadable loader {}: {}", path.display(), e),
            }
        }

        let mut existing = Vec::new();
        for name in &dirs {
            if let Some(shelf) = children.shelves.get(name) {
                existing.push(Arc::clone(shelf));
                continue;
            }
            if validate_name(name).is_err() || children.loaders.contains_key(name) {
                tracing::warn!("Skipping directory {}", self.dir.join(name).display());
                continue;
            }
            match self.open_child_shelf(name) {
                Ok(shelf) => {
                    events.push(TreeEvent::ShelfAdded {
                        path: shelf.full_name.clone(),
                    });
                    children.shelves.insert(name.clone(), shelf);
                }
                Err(e) => tracing::warn!("Skipping unreadable shelf {}: {}", name, e),
            }
        }
        drop(children);

        for event in events {
            tracing::debug!("Storage change: {:?}", event);
            self.emit(event);
        }

        // Step 3: descend into shelves that were already known
        for shelf in existing {
            shelf.scan()?;
        }
        Ok(())
    }

    fn conflict(&self, what: &str, name: &str) -> ShelfError {
        ShelfError::Conflict(format!(
            "{} '{}' already exists in '{}' with a different configuration",
            what, name, self.name
        ))
    }

    fn not_found(&self, what: &str, name: &str) -> ShelfError {
        ShelfError::NotFound(format!("{} '{}' in '{}'", what, name, self.name))
    }
}

impl Storage for FileStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn full_name(&self) -> String {
        self.full_name.clone()
    }

    fn meta(&self) -> Meta {
        self.meta.clone()
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn shelf_names(&self) -> Vec<String> {
        self.children.lock().shelves.keys().cloned().collect()
    }

    fn loader_names(&self) -> Vec<String> {
        self.children.lock().loaders.keys().cloned().collect()
    }

    fn get_shelf(&self, path: &str) -> Option<Arc<dyn Storage>> {
        let shelf: Arc<dyn Storage> = self.resolve_shelf(path)?;
        Some(shelf)
    }

    fn get_loader(&self, path: &str) -> Option<Arc<Loader>> {
        match path.rsplit_once(crate::meta::PATH_SEPARATOR) {
            Some((shelf, name)) => self.resolve_shelf(shelf)?.get_loader(name),
            None => self.children.lock().loaders.get(path).cloned(),
        }
    }

    fn build_shelf(&self, path: &str, meta: &Meta) -> Result<Arc<dyn Storage>> {
        let shelf: Arc<dyn Storage> = self.ensure_shelf(path, Some(meta))?;
        Ok(shelf)
    }

    fn build_loader(&self, path: &str, meta: &Meta) -> Result<Arc<Loader>> {
        match split_path(path) {
            (head, Some(rest)) => self.local_shelf(head, None)?.build_loader(rest, meta),
            (name, None) => self.local_loader(name, meta),
        }
    }

    fn remove_loader(&self, path: &str) -> Result<()> {
        match path.rsplit_once(crate::meta::PATH_SEPARATOR) {
            Some((shelf, name)) => self
                .resolve_shelf(shelf)
                .ok_or_else(|| self.not_found("Shelf", shelf))?
                .remove_local_loader(name),
            None => self.remove_local_loader(path),
        }
    }

    fn remove_shelf(&self, path: &str) -> Result<()> {
        match path.rsplit_once(crate::meta::PATH_SEPARATOR) {
            Some((parent, name)) => self
                .resolve_shelf(parent)
                .ok_or_else(|| self.not_found("Shelf", parent))?
                .remove_local_shelf(name),
            None => self.remove_local_shelf(path),
        }
    }

    fn refresh(&self) -> Result<()> {
        self.scan()
    }

    fn subscribe(&self, listener: Listener<TreeEvent>) -> Subscription {
        self.listeners.subscribe(move |event| listener(event))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.stop();
        }
        let children = std::mem::take(&mut *self.children.lock());
        for shelf in children.shelves.values() {
            shelf.close();
        }
        for loader in children.loaders.values() {
            loader.close();
        }
        tracing::debug!("Closed storage {}", self.dir.display());
    }

    fn respond(&self, request: &Meta) -> Response {
        crate::protocol::respond(self, request)
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.stop();
        }
    }
}

/// Normalized shelf configuration: the declaration without its children
fn shelf_config(name: &str, meta: &Meta) -> Meta {
    let mut config = meta.clone().with("name", name);
    for item in DECLARATION_ITEMS {
        config.remove(item);
    }
    config
}

fn declared_name(declaration: &Meta) -> Result<&str> {
    declaration
        .get_str("name")
        .ok_or_else(|| ShelfError::Config("Declaration without 'name'".to_string()))
}

/// Extension names a loader kind and the file starts with a tag marker
fn is_loader_file(path: &Path) -> bool {
    let known = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(LoaderKind::from_extension)
        .is_some();
    known && FileEnvelope::probe(path)
}
