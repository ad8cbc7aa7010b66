//! In-memory document store
//!
//! Process-local backend used for tests, demos and single-process
//! deployments. The connector exposes controls for simulating slow or
//! failing storage so the connection lifecycle can be exercised without a
//! database.

use super::{matches_filter, Collection, Connector, Database, Document, Filter, Update, ID_FIELD};
use crate::error::{AuthzError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock as SyncRwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory collection
pub struct MemoryCollection {
    name: String,
    documents: RwLock<Vec<Document>>,
    unique_fields: SyncRwLock<Vec<String>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryCollection {
    fn new(name: &str, unavailable: Arc<AtomicBool>) -> Self {
        Self {
            name: name.to_string(),
            documents: RwLock::new(Vec::new()),
            unique_fields: SyncRwLock::new(Vec::new()),
            unavailable,
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(AuthzError::Database(format!(
                "Collection '{}' is unavailable",
                self.name
            )));
        }
        Ok(())
    }

    /// Find a unique field on which `candidate` collides with another document
    fn find_violation(&self, documents: &[Document], candidate: &Document, skip: Option<usize>) -> Option<String> {
        let unique_fields = self.unique_fields.read();
        for field in unique_fields.iter() {
            let Some(value) = candidate.get(field) else {
                continue;
            };
            let collides = documents
                .iter()
                .enumerate()
                .filter(|(idx, _)| Some(*idx) != skip)
                .any(|(_, doc)| doc.get(field) == Some(value));
            if collides {
                return Some(format!("Duplicate {} {} in '{}'", field, value, self.name));
            }
        }
        None
    }

    async fn update(&self, filter: &Filter, update: &Update, limit: Option<usize>) -> Result<u64> {
        self.check_available()?;
        let mut documents = self.documents.write().await;

        // Stage every change first so a uniqueness failure leaves the collection untouched
        let mut staged = Vec::new();
        for (idx, doc) in documents.iter().enumerate() {
            if limit.is_some_and(|max| staged.len() >= max) {
                break;
            }
            if matches_filter(doc, filter) {
                let mut updated = doc.clone();
                update.apply(&mut updated);
                staged.push((idx, updated));
            }
        }

        for (idx, updated) in &staged {
            if let Some(violation) = self.find_violation(&documents, updated, Some(*idx)) {
                return Err(AuthzError::Conflict(violation));
            }
        }

        let matched = staged.len() as u64;
        for (idx, updated) in staged {
            documents[idx] = updated;
        }
        Ok(matched)
    }

    async fn delete(&self, filter: &Filter, limit: Option<usize>) -> Result<u64> {
        self.check_available()?;
        let mut documents = self.documents.write().await;
        let mut deleted = 0usize;

        documents.retain(|doc| {
            if limit.is_some_and(|max| deleted >= max) || !matches_filter(doc, filter) {
                true
            } else {
                deleted += 1;
                false
            }
        });

        Ok(deleted as u64)
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(&self, filter: &Filter) -> Result<Option<Document>> {
        self.check_available()?;
        let documents = self.documents.read().await;
        Ok(documents.iter().find(|doc| matches_filter(doc, filter)).cloned())
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Document>> {
        self.check_available()?;
        let documents = self.documents.read().await;
        Ok(documents
            .iter()
            .filter(|doc| matches_filter(doc, filter))
            .cloned()
            .collect())
    }

    async fn insert_one(&self, mut doc: Document) -> Result<Document> {
        self.check_available()?;
        let mut documents = self.documents.write().await;

        if !doc.contains_key(ID_FIELD) {
            doc.insert(ID_FIELD.to_string(), Value::String(Uuid::new_v4().to_string()));
        }
        if let Some(violation) = self.find_violation(&documents, &doc, None) {
            return Err(AuthzError::Conflict(violation));
        }

        documents.push(doc.clone());
        Ok(doc)
    }

    async fn update_one(&self, filter: &Filter, update: &Update) -> Result<u64> {
        self.update(filter, update, Some(1)).await
    }

    async fn update_many(&self, filter: &Filter, update: &Update) -> Result<u64> {
        self.update(filter, update, None).await
    }

    async fn delete_one(&self, filter: &Filter) -> Result<u64> {
        self.delete(filter, Some(1)).await
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64> {
        self.delete(filter, None).await
    }
}

/// In-memory database: a set of named collections
pub struct MemoryDatabase {
    collections: DashMap<String, Arc<MemoryCollection>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            collections: DashMap::new(),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every storage call fail with a `Database` error until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Unique fields registered on a collection
    pub fn unique_fields(&self, collection: &str) -> Vec<String> {
        self.collections
            .get(collection)
            .map(|c| c.unique_fields.read().clone())
            .unwrap_or_default()
    }

    fn memory_collection(&self, name: &str) -> Arc<MemoryCollection> {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCollection::new(name, self.unavailable.clone())))
            .clone()
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        self.memory_collection(name)
    }

    async fn ensure_unique_index(&self, collection: &str, field: &str) -> Result<()> {
        let collection = self.memory_collection(collection);
        collection.check_available()?;

        if collection.unique_fields.read().iter().any(|f| f == field) {
            return Ok(());
        }

        let documents = collection.documents.read().await;
        let mut seen = Vec::new();
        for value in documents.iter().filter_map(|doc| doc.get(field)) {
            if seen.contains(&value) {
                return Err(AuthzError::Conflict(format!(
                    "Cannot create unique index on '{}.{}': duplicate {}",
                    collection.name, field, value
                )));
            }
            seen.push(value);
        }
        drop(documents);

        let mut unique_fields = collection.unique_fields.write();
        if !unique_fields.iter().any(|f| f == field) {
            unique_fields.push(field.to_string());
        }
        Ok(())
    }
}

/// Connector for the in-memory database
///
/// Every successful attempt returns the same underlying database, so data
/// survives a reconnect within the process.
pub struct MemoryConnector {
    database: Arc<MemoryDatabase>,
    latency: Duration,
    failures_remaining: AtomicUsize,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::with_database(Arc::new(MemoryDatabase::new()))
    }

    /// Connector over an existing database
    pub fn with_database(database: Arc<MemoryDatabase>) -> Self {
        Self {
            database,
            latency: Duration::ZERO,
            failures_remaining: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Delay every connection attempt
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `count` connection attempts
    pub fn failing(self, count: usize) -> Self {
        self.failures_remaining.store(count, Ordering::Release);
        self
    }

    /// Fail the next `count` connection attempts (on a shared connector)
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::Release);
    }

    /// Number of connection attempts made so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }

    /// The backing database
    pub fn database(&self) -> Arc<MemoryDatabase> {
        self.database.clone()
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn Database>> {
        self.attempts.fetch_add(1, Ordering::AcqRel);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let forced_failure = self
            .failures_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if forced_failure {
            return Err(AuthzError::Connection(
                "memory store refused the connection".to_string(),
            ));
        }

        Ok(self.database.clone())
    }

    fn describe(&self) -> String {
        "memory://local".to_string()
    }
}
