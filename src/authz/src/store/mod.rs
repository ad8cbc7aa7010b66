//! Collection-oriented document storage
//!
//! Permissions and roles are persisted as schemaless documents in two named
//! collections. Backends implement three object-safe traits:
//!
//! - [`Connector`] performs one connection attempt
//! - [`Database`] hands out collections and maintains unique indexes
//! - [`Collection`] runs find/insert/update/delete against one collection
//!
//! Every call is a potential suspension point; nothing here retries.

use crate::error::{AuthzError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{MemoryConnector, MemoryDatabase};

#[cfg(feature = "postgres")]
pub use postgres::PostgresConnector;

/// Key of the storage-assigned identifier
pub const ID_FIELD: &str = "_id";

/// Schemaless stored record
pub type Document = Map<String, Value>;

/// Structural filter: equality predicates over top-level fields.
/// An empty filter matches every document.
pub type Filter = Map<String, Value>;

/// Build an equality filter on a single field
pub fn filter_eq(field: &str, value: impl Into<Value>) -> Filter {
    let mut filter = Filter::new();
    filter.insert(field.to_string(), value.into());
    filter
}

/// Whether `doc` satisfies every predicate of `filter`
pub fn matches_filter(doc: &Document, filter: &Filter) -> bool {
    filter
        .iter()
        .all(|(field, expected)| doc.get(field) == Some(expected))
}

/// Document update operation
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Replace the given fields, leaving the others untouched
    Set(Document),

    /// Append `value` to the array `field` unless already present
    AddToSet { field: String, value: Value },

    /// Remove every element equal to `value` from the array `field`
    Pull { field: String, value: Value },
}

impl Update {
    /// Apply the update to an in-memory document
    pub fn apply(&self, doc: &mut Document) {
        match self {
            Update::Set(fields) => {
                for (key, value) in fields {
                    doc.insert(key.clone(), value.clone());
                }
            }
            Update::AddToSet { field, value } => {
                let entry = doc
                    .entry(field.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if !entry.is_array() {
                    *entry = Value::Array(Vec::new());
                }
                if let Value::Array(items) = entry {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
            }
            Update::Pull { field, value } => {
                if let Some(Value::Array(items)) = doc.get_mut(field) {
                    items.retain(|item| item != value);
                }
            }
        }
    }
}

/// One named collection of documents
#[async_trait]
pub trait Collection: Send + Sync {
    /// Collection name
    fn name(&self) -> &str;

    /// First document matching the filter
    async fn find_one(&self, filter: &Filter) -> Result<Option<Document>>;

    /// Every document matching the filter, in insertion order
    async fn find(&self, filter: &Filter) -> Result<Vec<Document>>;

    /// Insert a document and return it as stored (with `_id`).
    /// Fails with `Conflict` when a unique index is violated.
    async fn insert_one(&self, doc: Document) -> Result<Document>;

    /// Update the first matching document; returns the matched count
    async fn update_one(&self, filter: &Filter, update: &Update) -> Result<u64>;

    /// Update every matching document; returns the matched count
    async fn update_many(&self, filter: &Filter, update: &Update) -> Result<u64>;

    /// Delete the first matching document; returns the deleted count
    async fn delete_one(&self, filter: &Filter) -> Result<u64>;

    /// Delete every matching document; returns the deleted count
    async fn delete_many(&self, filter: &Filter) -> Result<u64>;
}

/// Established storage connection
#[async_trait]
pub trait Database: Send + Sync {
    /// Handle to a named collection (created on first use)
    fn collection(&self, name: &str) -> Arc<dyn Collection>;

    /// Create a uniqueness constraint on `field`; idempotent
    async fn ensure_unique_index(&self, collection: &str, field: &str) -> Result<()>;
}

/// Produces a storage connection; one call is one attempt
#[async_trait]
pub trait Connector: Send + Sync {
    /// Attempt to connect. Failures are reported as `Connection` errors.
    async fn connect(&self) -> Result<Arc<dyn Database>>;

    /// Connection target for logs (never includes credentials)
    fn describe(&self) -> String;
}

/// Serialize a record into a document
pub fn to_document<T: Serialize>(record: &T) -> Result<Document> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(AuthzError::Serialization(format!(
            "Expected an object, got {}",
            other
        ))),
    }
}

/// Deserialize a stored document into a record
pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_filter_matching() {
        let d = doc(json!({"code": "U", "name": "User"}));

        assert!(matches_filter(&d, &Filter::new()));
        assert!(matches_filter(&d, &filter_eq("code", "U")));
        assert!(!matches_filter(&d, &filter_eq("code", "E")));
        assert!(!matches_filter(&d, &filter_eq("missing", "U")));
    }

    #[test]
    fn test_update_set_is_partial() {
        let mut d = doc(json!({"code": "U", "name": "User", "permissions": ["DR"]}));
        Update::Set(doc(json!({"name": "Plain user"}))).apply(&mut d);

        assert_eq!(Value::Object(d), json!({"code": "U", "name": "Plain user", "permissions": ["DR"]}));
    }

    #[test]
    fn test_update_add_to_set_and_pull() {
        let mut d = doc(json!({"code": "U"}));

        let add = Update::AddToSet { field: "permissions".into(), value: json!("DR") };
        add.apply(&mut d);
        add.apply(&mut d);
        assert_eq!(d["permissions"], json!(["DR"]));

        Update::Pull { field: "permissions".into(), value: json!("DR") }.apply(&mut d);
        assert_eq!(d["permissions"], json!([]));
    }

    #[test]
    fn test_pull_on_missing_field_is_noop() {
        let mut d = doc(json!({"code": "U"}));
        Update::Pull { field: "permissions".into(), value: json!("DR") }.apply(&mut d);
        assert!(!d.contains_key("permissions"));
    }
}
