//! Tests for the directory-backed storage tree
//!
//! These tests verify:
//! - Dotted paths create intermediate shelves
//! - Build-or-get semantics and configuration conflicts
//! - Reopening scans shelves and loaders back from disk
//! - Removal, refresh after outside changes and tree events
//! - Read-only storages, declarations and closing

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use shelfdb::index::ValueIndex;
use shelfdb::storage::SHELF_META_FILE;
use shelfdb::{
    Config, Context, FileStorage, Meta, Row, ShelfError, Storage, StorageConfig, TreeEvent, Value,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn root_dir(temp_dir: &TempDir) -> PathBuf {
    temp_dir.path().join("root")
}

fn open_with(dir: &Path, meta: Meta, config: Config) -> shelfdb::Result<Arc<FileStorage>> {
    let context = Context::new(config)?;
    let storage_config = StorageConfig::from_meta(&meta, context.config())?;
    FileStorage::open(&storage_config, context)
}

fn open_root(dir: &Path) -> Arc<FileStorage> {
    open_with(dir, StorageConfig::file_meta(dir), Config::default()).unwrap()
}

fn open_read_only(dir: &Path) -> shelfdb::Result<Arc<FileStorage>> {
    let meta = StorageConfig::file_meta(dir).with("readOnly", true);
    open_with(dir, meta, Config::default())
}

fn table_meta() -> Meta {
    Meta::new().with("type", "table").with(
        "format",
        vec![
            Meta::new().with("name", "time").with("type", "number"),
            Meta::new().with("name", "value").with("type", "number"),
        ],
    )
}

fn state_meta() -> Meta {
    Meta::new().with("type", "state")
}

fn record_events(storage: &dyn Storage) -> (Arc<Mutex<Vec<TreeEvent>>>, shelfdb::dispatch::Subscription) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let subscription = storage.subscribe(Arc::new(move |event: &TreeEvent| {
        sink.lock().push(event.clone());
        Ok(())
    }));
    (events, subscription)
}

// =============================================================================
// Path and Build Tests
// =============================================================================

#[test]
fn test_dotted_path_creates_intermediate_shelves() {
    let temp_dir = TempDir::new().unwrap();
    let dir = root_dir(&temp_dir);
    let root = open_root(&dir);

    let loader = root.build_loader("a.b.c", &table_meta()).unwrap();

    assert_eq!(loader.name(), "c");
    assert_eq!(loader.path(), dir.join("a").join("b").join("c.table"));
    assert!(dir.join("a").join(SHELF_META_FILE).is_file());
    assert!(dir.join("a").join("b").join(SHELF_META_FILE).is_file());

    assert_eq!(root.shelf_names(), vec!["a"]);
    assert!(root.loader_names().is_empty());

    let b = root.get_shelf("a.b").unwrap();
    assert_eq!(b.name(), "b");
    assert_eq!(b.full_name(), "a.b");
    assert_eq!(b.loader_names(), vec!["c"]);

    let found = root.get_loader("a.b.c").unwrap();
    assert!(Arc::ptr_eq(&loader, &found));
    assert!(root.get_loader("a.b.missing").is_none());
    assert!(root.get_shelf("a.x").is_none());
}

#[test]
fn test_root_is_named_after_directory() {
    let temp_dir = TempDir::new().unwrap();
    let root = open_root(&root_dir(&temp_dir));

    assert_eq!(root.name(), "root");
    assert_eq!(root.full_name(), "");
    assert!(!root.is_read_only());
}

#[test]
fn test_same_loader_config_returns_same_instance() {
    let temp_dir = TempDir::new().unwrap();
    let root = open_root(&root_dir(&temp_dir));

    let first = root.build_loader("run.data", &table_meta()).unwrap();
    let second = root.build_loader("run.data", &table_meta()).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let other_format = Meta::new().with("type", "table").with(
        "format",
        vec![Meta::new().with("name", "time").with("type", "number")],
    );
    let conflict = root.build_loader("run.data", &other_format);
    assert!(matches!(conflict, Err(ShelfError::Conflict(_))));

    let other_kind = root.build_loader("run.data", &state_meta());
    assert!(matches!(other_kind, Err(ShelfError::Conflict(_))));
}

#[test]
fn test_shelf_config_conflict() {
    let temp_dir = TempDir::new().unwrap();
    let root = open_root(&root_dir(&temp_dir));
    let meta = Meta::new().with("operator", "ada");

    let first = root.build_shelf("run1", &meta).unwrap();
    let second = root.build_shelf("run1", &meta).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.meta().get_str("operator"), Some("ada"));

    let conflict = root.build_shelf("run1", &Meta::new().with("operator", "bob"));
    assert!(matches!(conflict, Err(ShelfError::Conflict(_))));

    // passing through an existing shelf accepts its configuration
    root.build_loader("run1.settings", &state_meta()).unwrap();
    assert_eq!(root.get_shelf("run1").unwrap().loader_names(), vec!["settings"]);
}

#[test]
fn test_shelves_and_loaders_share_names() {
    let temp_dir = TempDir::new().unwrap();
    let root = open_root(&root_dir(&temp_dir));

    root.build_shelf("x", &Meta::new()).unwrap();
    let loader = root.build_loader("x", &state_meta());
    assert!(matches!(loader, Err(ShelfError::Conflict(_))));

    root.build_loader("y", &state_meta()).unwrap();
    let shelf = root.build_shelf("y", &Meta::new());
    assert!(matches!(shelf, Err(ShelfError::Conflict(_))));
    let through = root.build_loader("y.z", &state_meta());
    assert!(matches!(through, Err(ShelfError::Conflict(_))));
}

#[test]
fn test_invalid_names_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let root = open_root(&root_dir(&temp_dir));

    for path in [".cache", "", "a..b", "run./x", "x/y"] {
        let result = root.build_loader(path, &state_meta());
        assert!(
            matches!(result, Err(ShelfError::Config(_))),
            "path {:?} should be rejected",
            path
        );
    }
    assert!(root.loader_names().is_empty());
}

// =============================================================================
// Reopen Tests
// =============================================================================

#[test]
fn test_reopen_scans_tree() {
    let temp_dir = TempDir::new().unwrap();
    let dir = root_dir(&temp_dir);
    {
        let root = open_root(&dir);
        root.build_shelf("run1", &Meta::new().with("operator", "ada")).unwrap();
        let data = root.build_loader("run1.data", &table_meta()).unwrap();
        let table = data.as_table().unwrap();
        table
            .push_all((0..20).map(|i| Row::new(vec![Value::from(i), Value::from(0.5)])).collect())
            .unwrap();
        let index = table.get_index("time").unwrap();
        index.update().unwrap();
        index.persist().unwrap();
        root.build_loader("settings", &state_meta())
            .unwrap()
            .as_state()
            .unwrap()
            .push_value("mode", "scan")
            .unwrap();
        root.close();
    }
    assert!(dir.join("run1").join(".cache").is_dir());
    fs::write(dir.join("notes.txt"), "not a loader").unwrap();
    fs::write(dir.join("junk.table"), "not an envelope either").unwrap();

    let root = open_root(&dir);
    assert_eq!(root.shelf_names(), vec!["run1"]);
    assert_eq!(root.loader_names(), vec!["settings"]);

    let run1 = root.get_shelf("run1").unwrap();
    assert_eq!(run1.meta().get_str("operator"), Some("ada"));
    assert_eq!(run1.shelf_names(), Vec::<String>::new());
    assert_eq!(run1.loader_names(), vec!["data"]);

    let data = root.get_loader("run1.data").unwrap();
    let index = data.as_table().unwrap().get_index("time").unwrap();
    assert_eq!(index.key_set().unwrap().len(), 20);
    assert_eq!(index.last_scan_bytes(), 0);

    let settings = root.get_loader("settings").unwrap();
    assert_eq!(
        settings.as_state().unwrap().get_value("mode"),
        Some(Value::from("scan"))
    );

    // rebuilding with the same declaration finds the scanned loader
    let again = root.build_loader("run1.data", &table_meta()).unwrap();
    assert!(Arc::ptr_eq(&data, &again));
}

// =============================================================================
// Removal Tests
// =============================================================================

#[test]
fn test_remove_loader_and_shelf() {
    let temp_dir = TempDir::new().unwrap();
    let dir = root_dir(&temp_dir);
    let root = open_root(&dir);

    let loader = root.build_loader("run.data", &table_meta()).unwrap();
    let path = loader.path().to_path_buf();
    root.build_loader("run.inner.log", &Meta::new().with("type", "event"))
        .unwrap();

    root.remove_loader("run.data").unwrap();
    assert!(!path.exists());
    assert!(root.get_loader("run.data").is_none());
    assert!(matches!(
        root.remove_loader("run.data"),
        Err(ShelfError::NotFound(_))
    ));

    root.remove_shelf("run").unwrap();
    assert!(!dir.join("run").exists());
    assert!(root.shelf_names().is_empty());
    assert!(matches!(root.remove_shelf("run"), Err(ShelfError::NotFound(_))));
    assert!(matches!(
        root.remove_shelf("nope.deeper"),
        Err(ShelfError::NotFound(_))
    ));
}

// =============================================================================
// Refresh and Event Tests
// =============================================================================

#[test]
fn test_tree_events_bubble_to_ancestors() {
    let temp_dir = TempDir::new().unwrap();
    let dir = root_dir(&temp_dir);
    let context = Context::new(Config::default()).unwrap();
    let storage_config =
        StorageConfig::from_meta(&StorageConfig::file_meta(&dir), context.config()).unwrap();
    let root = FileStorage::open(&storage_config, Arc::clone(&context)).unwrap();

    let (root_events, _root_sub) = record_events(&*root);
    let run = root.build_shelf("run", &Meta::new()).unwrap();
    let (run_events, _run_sub) = record_events(&*run);

    root.build_loader("run.data", &table_meta()).unwrap();
    root.build_loader("top", &state_meta()).unwrap();
    root.remove_loader("run.data").unwrap();
    context.flush_notifications();

    assert_eq!(
        *root_events.lock(),
        vec![
            TreeEvent::ShelfAdded { path: "run".to_string() },
            TreeEvent::LoaderAdded { path: "run.data".to_string() },
            TreeEvent::LoaderAdded { path: "top".to_string() },
            TreeEvent::LoaderRemoved { path: "run.data".to_string() },
        ]
    );
    assert_eq!(
        *run_events.lock(),
        vec![
            TreeEvent::LoaderAdded { path: "run.data".to_string() },
            TreeEvent::LoaderRemoved { path: "run.data".to_string() },
        ]
    );
}

#[test]
fn test_cancelled_subscription_stops_events() {
    let temp_dir = TempDir::new().unwrap();
    let dir = root_dir(&temp_dir);
    let context = Context::new(Config::default()).unwrap();
    let storage_config =
        StorageConfig::from_meta(&StorageConfig::file_meta(&dir), context.config()).unwrap();
    let root = FileStorage::open(&storage_config, Arc::clone(&context)).unwrap();

    let (events, subscription) = record_events(&*root);
    root.build_loader("a", &state_meta()).unwrap();
    context.flush_notifications();
    subscription.cancel();
    root.build_loader("b", &state_meta()).unwrap();
    context.flush_notifications();

    assert_eq!(events.lock().len(), 1);
    assert_eq!(events.lock()[0].path(), "a");
}

#[test]
fn test_refresh_picks_up_outside_changes() {
    let temp_dir = TempDir::new().unwrap();
    let dir = root_dir(&temp_dir);
    let context = Context::new(Config::default()).unwrap();
    let storage_config =
        StorageConfig::from_meta(&StorageConfig::file_meta(&dir), context.config()).unwrap();
    let root = FileStorage::open(&storage_config, Arc::clone(&context)).unwrap();
    root.build_loader("kept", &state_meta()).unwrap();
    let doomed = root.build_loader("doomed", &state_meta()).unwrap();
    let doomed_path = doomed.path().to_path_buf();
    drop(doomed);

    // Step 1: another process writes into the same directory
    {
        let other = open_root(&dir);
        other.build_loader("ext.data", &table_meta()).unwrap();
        other.build_loader("fresh", &state_meta()).unwrap();
        other.close();
    }
    fs::remove_file(&doomed_path).unwrap();

    // Step 2: refresh reconciles and reports
    let (events, _subscription) = record_events(&*root);
    root.refresh().unwrap();
    context.flush_notifications();

    assert_eq!(root.loader_names(), vec!["fresh", "kept"]);
    assert_eq!(root.shelf_names(), vec!["ext"]);
    assert!(root.get_loader("ext.data").is_some());

    let mut paths: Vec<(String, bool)> = events
        .lock()
        .iter()
        .map(|e| {
            let added = matches!(e, TreeEvent::ShelfAdded { .. } | TreeEvent::LoaderAdded { .. });
            (e.path().to_string(), added)
        })
        .collect();
    paths.sort();
    assert_eq!(
        paths,
        vec![
            ("doomed".to_string(), false),
            ("ext".to_string(), true),
            ("ext.data".to_string(), true),
            ("fresh".to_string(), true),
        ]
    );

    // Step 3: a second refresh has nothing to report
    events.lock().clear();
    root.refresh().unwrap();
    context.flush_notifications();
    assert!(events.lock().is_empty());
}

#[test]
fn test_refresh_descends_into_known_shelves() {
    let temp_dir = TempDir::new().unwrap();
    let dir = root_dir(&temp_dir);
    let root = open_root(&dir);
    root.build_shelf("run", &Meta::new()).unwrap();

    {
        let other = open_root(&dir);
        other.build_loader("run.late", &state_meta()).unwrap();
        other.close();
    }
    assert!(root.get_loader("run.late").is_none());

    root.refresh().unwrap();
    assert!(root.get_loader("run.late").is_some());
}

#[test]
fn test_monitor_follows_directory() {
    let temp_dir = TempDir::new().unwrap();
    let dir = root_dir(&temp_dir);
    let meta = StorageConfig::file_meta(&dir).with("monitor", true);
    let config = Config::builder().monitor_interval_ms(20).build();
    let root = open_with(&dir, meta, config).unwrap();

    fs::create_dir(dir.join("appeared")).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while root.get_shelf("appeared").is_none() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(root.get_shelf("appeared").is_some());
    root.close();
}

// =============================================================================
// Read-Only Tests
// =============================================================================

#[test]
fn test_read_only_missing_directory() {
    let temp_dir = TempDir::new().unwrap();
    let result = open_read_only(&root_dir(&temp_dir));
    assert!(matches!(result, Err(ShelfError::NotFound(_))));
}

#[test]
fn test_read_only_storage_refuses_writes() {
    let temp_dir = TempDir::new().unwrap();
    let dir = root_dir(&temp_dir);
    {
        let root = open_root(&dir);
        let data = root.build_loader("data", &table_meta()).unwrap();
        data.as_table()
            .unwrap()
            .push(Row::new(vec![Value::from(1.0), Value::from(2.0)]))
            .unwrap();
        root.close();
    }

    let root = open_read_only(&dir).unwrap();
    assert!(root.is_read_only());

    let data = root.build_loader("data", &table_meta()).unwrap();
    assert!(data.is_read_only());
    assert_eq!(data.as_table().unwrap().len().unwrap(), 1);

    let push = data
        .as_table()
        .unwrap()
        .push(Row::new(vec![Value::from(3.0), Value::from(4.0)]));
    assert!(matches!(push, Err(ShelfError::ReadOnly(_))));

    let create = root.build_loader("other", &state_meta());
    assert!(matches!(create, Err(ShelfError::ReadOnly(_))));
    let shelf = root.build_shelf("new", &Meta::new());
    assert!(matches!(shelf, Err(ShelfError::ReadOnly(_))));
    let remove = root.remove_loader("data");
    assert!(matches!(remove, Err(ShelfError::ReadOnly(_))));
    assert!(dir.join("data.table").exists());
}

// =============================================================================
// Declaration Tests
// =============================================================================

fn declared_meta(dir: &Path, value_type: &str) -> Meta {
    let loader = Meta::new().with("name", "readings").with("type", "table").with(
        "format",
        vec![Meta::new().with("name", "value").with("type", value_type)],
    );
    let shelf = Meta::new()
        .with("name", "run1")
        .with("operator", "ada")
        .with("loader", vec![loader])
        .with("shelf", vec![Meta::new().with("name", "calibration")]);
    StorageConfig::file_meta(dir)
        .with("loader", vec![Meta::new().with("name", "settings").with("type", "state")])
        .with("shelf", vec![shelf])
}

#[test]
fn test_open_builds_declarations() {
    let temp_dir = TempDir::new().unwrap();
    let dir = root_dir(&temp_dir);

    let root = open_with(&dir, declared_meta(&dir, "number"), Config::default()).unwrap();
    assert_eq!(root.loader_names(), vec!["settings"]);
    assert_eq!(root.shelf_names(), vec!["run1"]);
    assert!(root.get_loader("run1.readings").is_some());
    assert!(root.get_shelf("run1.calibration").is_some());

    let run1 = root.get_shelf("run1").unwrap();
    assert_eq!(run1.meta().get_str("operator"), Some("ada"));
    assert!(run1.meta().get("loader").is_none());
    root.close();

    // same declarations again: no conflict
    let root = open_with(&dir, declared_meta(&dir, "number"), Config::default()).unwrap();
    assert!(root.get_loader("run1.readings").is_some());
    root.close();

    // a changed loader declaration conflicts with what is on disk
    let changed = open_with(&dir, declared_meta(&dir, "string"), Config::default());
    assert!(matches!(changed, Err(ShelfError::Conflict(_))));
}

// =============================================================================
// Close Tests
// =============================================================================

#[test]
fn test_close_releases_subtree() {
    let temp_dir = TempDir::new().unwrap();
    let root = open_root(&root_dir(&temp_dir));
    let loader = root.build_loader("run.data", &table_meta()).unwrap();

    root.close();
    root.close();

    assert!(loader.base().envelope().is_closed());
    assert!(root.shelf_names().is_empty());
    let build = root.build_loader("other", &state_meta());
    assert!(matches!(build, Err(ShelfError::Closed(_))));
    assert!(matches!(root.refresh(), Err(ShelfError::Closed(_))));
}
