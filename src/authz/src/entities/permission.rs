//! Permission records

use super::{dedupe, ensure_exist, required};
use crate::cache::CacheInvalidator;
use crate::connection::ConnectionManager;
use crate::error::{AuthzError, Result};
use crate::store::{filter_eq, from_document, to_document, Collection, Filter, Update};
use crate::types::{Permission, PermissionInput};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

const ENTITY: &str = "Permission";

/// CRUD over the permission collection
#[derive(Clone)]
pub struct PermissionStore {
    connection: Arc<ConnectionManager>,
    collection: String,
    role_collection: String,
    invalidator: CacheInvalidator,
}

impl PermissionStore {
    pub fn new(
        connection: Arc<ConnectionManager>,
        collection: &str,
        role_collection: &str,
        invalidator: CacheInvalidator,
    ) -> Self {
        Self {
            connection,
            collection: collection.to_string(),
            role_collection: role_collection.to_string(),
            invalidator,
        }
    }

    async fn permissions(&self) -> Result<Arc<dyn Collection>> {
        Ok(self.connection.database().await?.collection(&self.collection))
    }

    async fn roles(&self) -> Result<Arc<dyn Collection>> {
        Ok(self.connection.database().await?.collection(&self.role_collection))
    }

    /// Look up a permission by code
    pub async fn fetch(&self, code: &str) -> Result<Option<Permission>> {
        let permissions = self.permissions().await?;
        permissions
            .find_one(&filter_eq("code", code))
            .await?
            .map(from_document)
            .transpose()
    }

    /// Every permission matching the structural filter
    pub async fn list(&self, query: &Filter) -> Result<Vec<Permission>> {
        let permissions = self.permissions().await?;
        permissions
            .find(query)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    /// Create a permission
    ///
    /// # Errors
    ///
    /// - `Validation` if `code` or `name` is missing
    /// - `Conflict` if the code is taken
    /// - `Reference` if an included permission does not exist
    pub async fn create(&self, input: PermissionInput) -> Result<Permission> {
        let code = required(input.code, ENTITY, "code")?;
        let name = required(input.name, ENTITY, "name")?;
        let permissions = self.permissions().await?;

        if permissions.find_one(&filter_eq("code", code.as_str())).await?.is_some() {
            return Err(AuthzError::Conflict(format!(
                "Permission code '{}' should be unique",
                code
            )));
        }

        let includes = dedupe(input.includes.unwrap_or_default());
        ensure_exist(permissions.as_ref(), &includes, ENTITY).await?;

        let record = Permission {
            id: None,
            code,
            name,
            description: input.description,
            meta: Some(input.meta.unwrap_or_default()),
            includes,
        };
        let stored = permissions.insert_one(to_document(&record)?).await?;
        self.invalidator.mark_stale();

        debug!("Created permission '{}'", record.code);
        from_document(stored)
    }

    /// Replace the given fields of a permission, creating it when absent
    pub async fn update(&self, input: PermissionInput) -> Result<Permission> {
        let code = required(input.code.clone(), ENTITY, "code")?;
        let permissions = self.permissions().await?;

        if permissions.find_one(&filter_eq("code", code.as_str())).await?.is_none() {
            return self.create(input).await;
        }

        let mut changes = input;
        changes.code = None;
        if let Some(name) = &changes.name {
            if name.trim().is_empty() {
                return Err(AuthzError::Validation("Permission name cannot be empty".to_string()));
            }
        }
        if let Some(includes) = changes.includes.take() {
            let includes = dedupe(includes);
            if includes.contains(&code) {
                return Err(AuthzError::Validation(format!(
                    "Permission '{}' cannot include itself",
                    code
                )));
            }
            ensure_exist(permissions.as_ref(), &includes, ENTITY).await?;
            changes.includes = Some(includes);
        }

        let fields = to_document(&changes)?;
        if !fields.is_empty() {
            permissions
                .update_one(&filter_eq("code", code.as_str()), &Update::Set(fields))
                .await?;
        }
        self.invalidator.mark_stale();

        self.fetch(&code).await?.ok_or_else(|| {
            AuthzError::Conflict(format!("Permission '{}' was removed during update", code))
        })
    }

    /// Delete a permission and retract it from every role and umbrella
    ///
    /// An umbrella whose last included permission is retracted here is
    /// removed with it, the same way; left in place it would resolve as a
    /// leaf and grant its own code. Idempotent; returns whether a record
    /// with `code` was deleted.
    pub async fn remove(&self, code: &str) -> Result<bool> {
        let permissions = self.permissions().await?;
        let roles = self.roles().await?;
        let everything = Filter::new();

        let mut pending = vec![code.to_string()];
        let mut visited = HashSet::new();
        let mut removed = false;

        while let Some(current) = pending.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }

            let emptied: Vec<String> = permissions
                .find(&filter_eq("includes", json!([current])))
                .await?
                .into_iter()
                .map(from_document::<Permission>)
                .map(|umbrella| umbrella.map(|u| u.code))
                .collect::<Result<_>>()?;

            // Retract first: no role may reference a deleted permission
            let retracted = roles
                .update_many(
                    &everything,
                    &Update::Pull {
                        field: "permissions".to_string(),
                        value: Value::String(current.clone()),
                    },
                )
                .await?;
            permissions
                .update_many(
                    &everything,
                    &Update::Pull {
                        field: "includes".to_string(),
                        value: Value::String(current.clone()),
                    },
                )
                .await?;

            self.invalidator.mark_stale();
            let deleted = permissions.delete_one(&filter_eq("code", current.as_str())).await?;
            if current == code {
                removed = deleted > 0;
            }

            info!("Removed permission '{}' (checked {} roles)", current, retracted);
            if !emptied.is_empty() {
                debug!("Umbrellas left empty by '{}': {:?}", current, emptied);
            }
            pending.extend(emptied);
        }

        Ok(removed)
    }

    /// Delete every permission
    pub async fn clear(&self) -> Result<u64> {
        let permissions = self.permissions().await?;
        self.invalidator.mark_stale();
        permissions.delete_many(&Filter::new()).await
    }
}
