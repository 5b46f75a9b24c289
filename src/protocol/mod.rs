//! Protocol Module
//!
//! Request/response routing that lets the storage tree act as a
//! message-addressable service.
//!
//! ## Request Document
//! ```text
//! ┌──────────────┬──────────────────────────────────────────────┐
//! │ targetType   │ "storage" | "loader"                         │
//! │ targetName   │ dotted path from the responding node         │
//! │ allowCreate  │ create the target when it is missing         │
//! │ creationMeta │ configuration for the created target         │
//! └──────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! ## Response Document
//! ```text
//! { status: "ok",    payload: <entity description> }
//! { status: "error", payload: { type: <error kind>, message } }
//! ```

mod request;
mod response;

use crate::error::{Result, ShelfError};
use crate::meta::{Meta, MetaItem};
use crate::storage::Storage;
use crate::value::Value;

pub use request::{Request, TargetType};
pub use response::{Response, Status};

/// Answer a request document against `storage`
///
/// Never fails: every error becomes an ERROR response.
pub fn respond(storage: &dyn Storage, request: &Meta) -> Response {
    let result = Request::from_meta(request).and_then(|request| handle(storage, &request));
    match result {
        Ok(payload) => Response::ok(payload),
        Err(e) => {
            tracing::debug!("Request failed: {}", e);
            Response::from_error(&e)
        }
    }
}

fn handle(storage: &dyn Storage, request: &Request) -> Result<Meta> {
    let name = request.target_name.as_str();
    match request.target_type {
        TargetType::Storage if name.is_empty() => Ok(describe_storage(storage)),
        TargetType::Storage => match storage.get_shelf(name) {
            Some(shelf) => Ok(describe_storage(shelf.as_ref())),
            None if request.allow_create => {
                let shelf = storage.build_shelf(name, &request.creation_meta)?;
                Ok(describe_storage(shelf.as_ref()))
            }
            None => Err(ShelfError::NotFound(format!("Shelf '{}'", name))),
        },
        TargetType::Loader => match storage.get_loader(name) {
            Some(loader) => loader.describe(),
            None if request.allow_create => {
                storage.build_loader(name, &request.creation_meta)?.describe()
            }
            None => Err(ShelfError::NotFound(format!("Loader '{}'", name))),
        },
    }
}

/// Summary of a storage node used by responses
pub fn describe_storage(storage: &dyn Storage) -> Meta {
    let names = |names: Vec<String>| {
        MetaItem::List(
            names
                .into_iter()
                .map(|n| MetaItem::Value(Value::String(n)))
                .collect(),
        )
    };
    Meta::new()
        .with("name", storage.name())
        .with("fullName", storage.full_name())
        .with("meta", storage.meta())
        .with("shelves", names(storage.shelf_names()))
        .with("loaders", names(storage.loader_names()))
}
