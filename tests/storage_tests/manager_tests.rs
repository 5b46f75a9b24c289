//! Tests for StorageManager and request handling
//!
//! These tests verify:
//! - One root storage per configuration document
//! - Backend lookup and unknown backends
//! - Closing every built storage
//! - Request/response routing against a storage tree

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use shelfdb::protocol::{Request, Response, Status, TargetType};
use shelfdb::storage::StorageConstructor;
use shelfdb::{Config, Context, FileStorage, Meta, ShelfError, Storage, StorageConfig, StorageManager};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (TempDir, PathBuf, StorageManager) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    let context = Context::with_working_dir(&path).unwrap();
    (temp_dir, path, StorageManager::with_default_backends(context))
}

fn same_instance(a: &Arc<dyn Storage>, b: &Arc<dyn Storage>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn table_meta() -> Meta {
    Meta::new().with("type", "table").with(
        "format",
        vec![Meta::new().with("name", "value").with("type", "number")],
    )
}

fn root_storage(dir: &Path) -> Arc<FileStorage> {
    let context = Context::new(Config::default()).unwrap();
    let config = StorageConfig::from_meta(&StorageConfig::file_meta(dir), context.config()).unwrap();
    FileStorage::open(&config, context).unwrap()
}

// =============================================================================
// Manager Tests
// =============================================================================

#[test]
fn test_default_backends() {
    let (_temp, _path, manager) = setup();
    assert_eq!(manager.backend_names(), vec!["file"]);
    assert_eq!(manager.storage_count(), 0);
}

#[test]
fn test_equal_documents_share_one_storage() {
    let (_temp, path, manager) = setup();
    let meta = Meta::new().with("type", "file").with("path", "data");

    let first = manager.build_storage(&meta).unwrap();
    let second = manager.build_storage(&meta.clone()).unwrap();
    assert!(same_instance(&first, &second));
    assert_eq!(manager.storage_count(), 1);

    // relative paths resolve against the working directory
    assert!(path.join("data").is_dir());
    assert_eq!(first.name(), "data");

    let other = manager
        .build_storage(&Meta::new().with("type", "file").with("path", "other"))
        .unwrap();
    assert!(!same_instance(&first, &other));
    assert_eq!(manager.storage_count(), 2);
}

#[test]
fn test_missing_type_uses_file_backend() {
    let (_temp, path, manager) = setup();
    let storage = manager
        .build_storage(&Meta::new().with("path", "untyped"))
        .unwrap();

    assert_eq!(storage.name(), "untyped");
    assert!(path.join("untyped").is_dir());
}

#[test]
fn test_unknown_backend_and_missing_path() {
    let (_temp, path, manager) = setup();

    let unknown = manager.build_storage(&Meta::new().with("type", "cloud").with("path", "x"));
    assert!(matches!(unknown, Err(ShelfError::Config(_))));
    assert!(!path.join("x").exists());

    let no_path = manager.build_storage(&Meta::new().with("type", "file"));
    assert!(matches!(no_path, Err(ShelfError::Config(_))));
    assert_eq!(manager.storage_count(), 0);
}

#[test]
fn test_custom_backend_table() {
    let temp_dir = TempDir::new().unwrap();
    let context = Context::with_working_dir(temp_dir.path()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let mut backends: BTreeMap<String, StorageConstructor> = BTreeMap::new();
    backends.insert(
        "counted".to_string(),
        Box::new(move |config: &StorageConfig, context: Arc<Context>| {
            counter.fetch_add(1, Ordering::SeqCst);
            let storage: Arc<dyn Storage> = FileStorage::open(config, context)?;
            Ok(storage)
        }),
    );
    let manager = StorageManager::new(context, backends);
    let meta = Meta::new().with("type", "counted").with("path", "c");

    manager.build_storage(&meta).unwrap();
    manager.build_storage(&meta).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let file = manager.build_storage(&Meta::new().with("type", "file").with("path", "f"));
    assert!(matches!(file, Err(ShelfError::Config(_))));
}

#[test]
fn test_close_all() {
    let (_temp, _path, manager) = setup();
    let meta = Meta::new().with("path", "data");
    let storage = manager.build_storage(&meta).unwrap();
    let loader = storage.build_loader("points", &table_meta()).unwrap();

    manager.close_all();
    assert_eq!(manager.storage_count(), 0);
    assert!(loader.base().envelope().is_closed());
    assert!(matches!(
        storage.build_loader("more", &table_meta()),
        Err(ShelfError::Closed(_))
    ));

    // a closed storage is forgotten, so the same document builds a new one
    let reopened = manager.build_storage(&meta).unwrap();
    assert!(!same_instance(&storage, &reopened));
    assert_eq!(reopened.loader_names(), vec!["points"]);
}

// =============================================================================
// Request / Response Tests
// =============================================================================

#[test]
fn test_describe_root() {
    let temp_dir = TempDir::new().unwrap();
    let root = root_storage(&temp_dir.path().join("lab"));
    root.build_loader("run.data", &table_meta()).unwrap();
    root.build_loader("notes", &Meta::new().with("type", "state")).unwrap();

    let response = root.respond(&Request::new(TargetType::Storage, "").to_meta());
    assert!(response.is_ok());
    assert_eq!(response.payload.get_str("name"), Some("lab"));
    assert_eq!(response.payload.get_str("fullName"), Some(""));

    let shelves = Meta::new().with(
        "list",
        shelfdb::MetaItem::List(vec![shelfdb::MetaItem::Value("run".into())]),
    );
    assert_eq!(response.payload.get("shelves"), shelves.get("list"));
}

#[test]
fn test_request_existing_targets() {
    let temp_dir = TempDir::new().unwrap();
    let root = root_storage(temp_dir.path());
    root.build_loader("run.data", &table_meta()).unwrap();

    let shelf = root.respond(&Request::new(TargetType::Storage, "run").to_meta());
    assert!(shelf.is_ok());
    assert_eq!(shelf.payload.get_str("fullName"), Some("run"));

    let loader = root.respond(&Request::new(TargetType::Loader, "run.data").to_meta());
    assert!(loader.is_ok());
    assert_eq!(loader.payload.get_str("name"), Some("data"));
    assert_eq!(loader.payload.get_str("type"), Some("table"));
}

#[test]
fn test_request_missing_target() {
    let temp_dir = TempDir::new().unwrap();
    let root = root_storage(temp_dir.path());

    let response = root.respond(&Request::new(TargetType::Loader, "run.data").to_meta());
    assert_eq!(response.status, Status::Error);
    assert_eq!(response.error_kind(), Some("not_found"));
    assert!(response.payload.get_str("message").is_some());
    assert!(root.get_shelf("run").is_none());
}

#[test]
fn test_request_allow_create() {
    let temp_dir = TempDir::new().unwrap();
    let root = root_storage(temp_dir.path());

    let request = Request::new(TargetType::Loader, "run.data").create_with(table_meta());
    let response = root.respond(&request.to_meta());
    assert!(response.is_ok(), "{:?}", response);
    assert!(root.get_loader("run.data").is_some());

    let shelf = Request::new(TargetType::Storage, "archive")
        .create_with(Meta::new().with("owner", "lab"));
    let response = root.respond(&shelf.to_meta());
    assert!(response.is_ok());
    assert_eq!(response.payload.get_str("meta.owner"), Some("lab"));

    // creation failures are reported, not raised
    let bad = Request::new(TargetType::Loader, "broken").create_with(Meta::new());
    let response = root.respond(&bad.to_meta());
    assert_eq!(response.error_kind(), Some("config"));
}

#[test]
fn test_request_conflict_reported() {
    let temp_dir = TempDir::new().unwrap();
    let root = root_storage(temp_dir.path());
    root.build_shelf("x", &Meta::new()).unwrap();

    let request = Request::new(TargetType::Loader, "x").create_with(table_meta());
    let response = root.respond(&request.to_meta());
    assert_eq!(response.error_kind(), Some("conflict"));
}

#[test]
fn test_malformed_requests() {
    let temp_dir = TempDir::new().unwrap();
    let root = root_storage(temp_dir.path());

    let unknown = root.respond(
        &Meta::new()
            .with("targetType", "printer")
            .with("targetName", "x"),
    );
    assert_eq!(unknown.error_kind(), Some("protocol"));

    let untyped = root.respond(&Meta::new().with("targetName", "x"));
    assert_eq!(untyped.error_kind(), Some("protocol"));
}

#[test]
fn test_shelf_alias_for_storage_target() {
    let temp_dir = TempDir::new().unwrap();
    let root = root_storage(temp_dir.path());
    root.build_shelf("run", &Meta::new()).unwrap();

    let response = root.respond(
        &Meta::new()
            .with("targetType", "shelf")
            .with("targetName", "run"),
    );
    assert!(response.is_ok());
}

#[test]
fn test_request_and_response_documents() {
    let request = Request::new(TargetType::Loader, "a.b").create_with(table_meta());
    let meta = request.to_meta();
    assert_eq!(meta.get_str("targetType"), Some("loader"));
    assert_eq!(meta.get_bool("allowCreate"), Some(true));
    assert_eq!(Request::from_meta(&meta).unwrap(), request);

    let ok = Response::ok(Meta::new().with("name", "a"));
    assert_eq!(Response::from_meta(&ok.to_meta()).unwrap(), ok);
    assert_eq!(ok.error_kind(), None);

    let error = Response::from_error(&ShelfError::NotFound("Loader 'x'".to_string()));
    let restored = Response::from_meta(&error.to_meta()).unwrap();
    assert_eq!(restored.status, Status::Error);
    assert_eq!(restored.error_kind(), Some("not_found"));

    let bad = Response::from_meta(&Meta::new().with("status", "maybe"));
    assert!(matches!(bad, Err(ShelfError::Protocol(_))));
}
