//! Meta documents
//!
//! A `Meta` is a hierarchical, ordered document of named items. An item is a
//! scalar [`Value`], a child node, or a list of items. Paths are dotted
//! (`"a.b.c"`) and walk through child nodes.
//!
//! Meta documents describe envelopes, loaders and storage configuration.
//! Two documents are equal when they are structurally equal (numeric values
//! compare with the value tolerance).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Number as JsonNumber, Value as JsonValue};

use crate::error::{Result, ShelfError};
use crate::value::Value;

/// Separator of path segments
pub const PATH_SEPARATOR: char = '.';

/// Hierarchical key/value document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    items: BTreeMap<String, MetaItem>,
}

/// A single named item of a meta document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetaItem {
    Value(Value),
    Node(Meta),
    List(Vec<MetaItem>),
}

impl Meta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Names of the top-level items in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(|k| k.as_str())
    }

    /// Top-level items in name order
    pub fn items(&self) -> impl Iterator<Item = (&str, &MetaItem)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v))
    }

    // =========================================================================
    // Path Access
    // =========================================================================

    /// Get the item at a dotted path
    pub fn get(&self, path: &str) -> Option<&MetaItem> {
        let (head, tail) = match path.split_once(PATH_SEPARATOR) {
            Some((head, tail)) => (head, Some(tail)),
            None => (path, None),
        };
        let item = self.items.get(head)?;
        match tail {
            None => Some(item),
            Some(rest) => match item {
                MetaItem::Node(node) => node.get(rest),
                _ => None,
            },
        }
    }

    pub fn get_value(&self, path: &str) -> Option<&Value> {
        match self.get(path)? {
            MetaItem::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get_value(path)?.as_str()
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get_value(path)?.as_bool()
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get_value(path)?.as_f64()
    }

    pub fn get_node(&self, path: &str) -> Option<&Meta> {
        match self.get(path)? {
            MetaItem::Node(node) => Some(node),
            _ => None,
        }
    }

    /// All child nodes at a path: a single node, or the nodes of a list
    pub fn get_nodes(&self, path: &str) -> Vec<&Meta> {
        match self.get(path) {
            Some(MetaItem::Node(node)) => vec![node],
            Some(MetaItem::List(items)) => items
                .iter()
                .filter_map(|item| match item {
                    MetaItem::Node(node) => Some(node),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Set the item at a dotted path, creating intermediate nodes
    ///
    /// A non-node item standing in the way of the path is replaced by a node.
    pub fn set(&mut self, path: &str, item: impl Into<MetaItem>) {
        match path.split_once(PATH_SEPARATOR) {
            None => {
                self.items.insert(path.to_string(), item.into());
            }
            Some((head, rest)) => {
                let entry = self
                    .items
                    .entry(head.to_string())
                    .or_insert_with(|| MetaItem::Node(Meta::new()));
                if !matches!(entry, MetaItem::Node(_)) {
                    *entry = MetaItem::Node(Meta::new());
                }
                if let MetaItem::Node(node) = entry {
                    node.set(rest, item);
                }
            }
        }
    }

    /// Builder-style [`Meta::set`]
    pub fn with(mut self, path: &str, item: impl Into<MetaItem>) -> Self {
        self.set(path, item);
        self
    }

    /// Remove the item at a dotted path
    pub fn remove(&mut self, path: &str) -> Option<MetaItem> {
        match path.split_once(PATH_SEPARATOR) {
            None => self.items.remove(path),
            Some((head, rest)) => match self.items.get_mut(head)? {
                MetaItem::Node(node) => node.remove(rest),
                _ => None,
            },
        }
    }

    /// Layer `self` on top of `base`
    ///
    /// Items of `self` win; child nodes present on both sides are merged
    /// recursively.
    pub fn overlay(&self, base: &Meta) -> Meta {
        let mut result = base.clone();
        for (name, item) in &self.items {
            let merged = match (item, base.items.get(name)) {
                (MetaItem::Node(top), Some(MetaItem::Node(bottom))) => {
                    MetaItem::Node(top.overlay(bottom))
                }
                _ => item.clone(),
            };
            result.items.insert(name.clone(), merged);
        }
        result
    }

    // =========================================================================
    // JSON Conversion
    // =========================================================================

    pub fn to_json(&self) -> JsonValue {
        let mut map = JsonMap::new();
        for (name, item) in &self.items {
            map.insert(name.clone(), item.to_json());
        }
        JsonValue::Object(map)
    }

    /// Build a document from a JSON object
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        match json {
            JsonValue::Object(map) => {
                let mut meta = Meta::new();
                for (name, value) in map {
                    if name.contains(PATH_SEPARATOR) {
                        return Err(ShelfError::Config(format!(
                            "Meta item name '{}' must not contain '{}'",
                            name, PATH_SEPARATOR
                        )));
                    }
                    meta.items.insert(name.clone(), MetaItem::from_json(value)?);
                }
                Ok(meta)
            }
            other => Err(ShelfError::Config(format!(
                "Expected a JSON object for meta, got {}",
                other
            ))),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let json: JsonValue = serde_json::from_str(text)?;
        Self::from_json(&json)
    }
}

impl MetaItem {
    fn to_json(&self) -> JsonValue {
        match self {
            MetaItem::Value(value) => match value {
                Value::Null => JsonValue::Null,
                Value::Boolean(b) => JsonValue::Bool(*b),
                Value::Number(n) => JsonNumber::from_f64(*n)
                    .map(JsonValue::Number)
                    .unwrap_or(JsonValue::Null),
                Value::Time(t) => JsonValue::String(t.to_rfc3339()),
                Value::String(s) => JsonValue::String(s.clone()),
            },
            MetaItem::Node(node) => node.to_json(),
            MetaItem::List(items) => JsonValue::Array(items.iter().map(|i| i.to_json()).collect()),
        }
    }

    fn from_json(json: &JsonValue) -> Result<Self> {
        Ok(match json {
            JsonValue::Null => MetaItem::Value(Value::Null),
            JsonValue::Bool(b) => MetaItem::Value(Value::Boolean(*b)),
            JsonValue::Number(n) => MetaItem::Value(n.as_f64().map(Value::Number).unwrap_or(Value::Null)),
            JsonValue::String(s) => MetaItem::Value(Value::String(s.clone())),
            JsonValue::Array(items) => MetaItem::List(
                items
                    .iter()
                    .map(MetaItem::from_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            JsonValue::Object(_) => MetaItem::Node(Meta::from_json(json)?),
        })
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<Value> for MetaItem {
    fn from(v: Value) -> Self {
        MetaItem::Value(v)
    }
}

impl From<Meta> for MetaItem {
    fn from(v: Meta) -> Self {
        MetaItem::Node(v)
    }
}

impl From<Vec<Meta>> for MetaItem {
    fn from(v: Vec<Meta>) -> Self {
        MetaItem::List(v.into_iter().map(MetaItem::Node).collect())
    }
}

impl From<&str> for MetaItem {
    fn from(v: &str) -> Self {
        MetaItem::Value(Value::from(v))
    }
}

impl From<String> for MetaItem {
    fn from(v: String) -> Self {
        MetaItem::Value(Value::from(v))
    }
}

impl From<f64> for MetaItem {
    fn from(v: f64) -> Self {
        MetaItem::Value(Value::from(v))
    }
}

impl From<i64> for MetaItem {
    fn from(v: i64) -> Self {
        MetaItem::Value(Value::from(v))
    }
}

impl From<bool> for MetaItem {
    fn from(v: bool) -> Self {
        MetaItem::Value(Value::from(v))
    }
}

impl From<i32> for MetaItem {
    fn from(v: i32) -> Self {
        MetaItem::Value(Value::from(v))
    }
}
