//! Role records, grants and revocations

use super::{dedupe, ensure_exist, required};
use crate::cache::CacheInvalidator;
use crate::connection::ConnectionManager;
use crate::error::{AuthzError, Result};
use crate::store::{filter_eq, from_document, to_document, Collection, Filter, Update};
use crate::types::{Role, RoleInput};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

const ENTITY: &str = "Role";

/// CRUD over the role collection
#[derive(Clone)]
pub struct RoleStore {
    connection: Arc<ConnectionManager>,
    collection: String,
    permission_collection: String,
    invalidator: CacheInvalidator,
}

impl RoleStore {
    pub fn new(
        connection: Arc<ConnectionManager>,
        collection: &str,
        permission_collection: &str,
        invalidator: CacheInvalidator,
    ) -> Self {
        Self {
            connection,
            collection: collection.to_string(),
            permission_collection: permission_collection.to_string(),
            invalidator,
        }
    }

    async fn roles(&self) -> Result<Arc<dyn Collection>> {
        Ok(self.connection.database().await?.collection(&self.collection))
    }

    async fn permissions(&self) -> Result<Arc<dyn Collection>> {
        Ok(self.connection.database().await?.collection(&self.permission_collection))
    }

    /// Look up a role by code
    pub async fn fetch(&self, code: &str) -> Result<Option<Role>> {
        let roles = self.roles().await?;
        roles
            .find_one(&filter_eq("code", code))
            .await?
            .map(from_document)
            .transpose()
    }

    /// Every role matching the structural filter
    pub async fn list(&self, query: &Filter) -> Result<Vec<Role>> {
        let roles = self.roles().await?;
        roles
            .find(query)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    /// Create a role
    ///
    /// # Errors
    ///
    /// - `Validation` if `code` or `name` is missing
    /// - `Conflict` if the code is taken
    /// - `Reference` if a granted permission or inherited role does not exist
    pub async fn create(&self, input: RoleInput) -> Result<Role> {
        let code = required(input.code, ENTITY, "code")?;
        let name = required(input.name, ENTITY, "name")?;
        let roles = self.roles().await?;

        if roles.find_one(&filter_eq("code", code.as_str())).await?.is_some() {
            return Err(AuthzError::Conflict(format!(
                "Role code '{}' should be unique",
                code
            )));
        }

        let permissions = dedupe(input.permissions.unwrap_or_default());
        let inherited = dedupe(input.inherited.unwrap_or_default());
        self.check_references(roles.as_ref(), &code, &permissions, &inherited)
            .await?;

        let record = Role {
            id: None,
            code,
            name,
            description: input.description,
            meta: Some(input.meta.unwrap_or_default()),
            permissions,
            inherited,
            attributes: input.attributes.unwrap_or_default(),
        };
        let stored = roles.insert_one(to_document(&record)?).await?;
        self.invalidator.mark_stale();

        debug!("Created role '{}'", record.code);
        from_document(stored)
    }

    /// Replace the given fields of a role, creating it when absent
    pub async fn update(&self, input: RoleInput) -> Result<Role> {
        let code = required(input.code.clone(), ENTITY, "code")?;
        let roles = self.roles().await?;

        if roles.find_one(&filter_eq("code", code.as_str())).await?.is_none() {
            return self.create(input).await;
        }

        let mut changes = input;
        changes.code = None;
        if let Some(name) = &changes.name {
            if name.trim().is_empty() {
                return Err(AuthzError::Validation("Role name cannot be empty".to_string()));
            }
        }
        changes.permissions = changes.permissions.take().map(dedupe);
        changes.inherited = changes.inherited.take().map(dedupe);
        self.check_references(
            roles.as_ref(),
            &code,
            changes.permissions.as_deref().unwrap_or_default(),
            changes.inherited.as_deref().unwrap_or_default(),
        )
        .await?;

        let fields = to_document(&changes)?;
        if !fields.is_empty() {
            roles
                .update_one(&filter_eq("code", code.as_str()), &Update::Set(fields))
                .await?;
        }
        self.invalidator.mark_stale();

        self.fetch(&code).await?.ok_or_else(|| {
            AuthzError::Conflict(format!("Role '{}' was removed during update", code))
        })
    }

    /// Delete a role; idempotent
    ///
    /// Roles inheriting from it keep the stale reference, which resolution skips.
    pub async fn remove(&self, code: &str) -> Result<bool> {
        let roles = self.roles().await?;
        self.invalidator.mark_stale();
        let deleted = roles.delete_one(&filter_eq("code", code)).await?;

        info!("Removed role '{}'", code);
        Ok(deleted > 0)
    }

    /// Add a permission to a role's direct grants
    ///
    /// Returns the updated role, or `None` when the role does not exist.
    ///
    /// # Errors
    ///
    /// `Reference` if the permission does not exist.
    pub async fn grant(&self, role: &str, permission: &str) -> Result<Option<Role>> {
        let permissions = self.permissions().await?;
        ensure_exist(permissions.as_ref(), &[permission.to_string()], "Permission").await?;

        let roles = self.roles().await?;
        let matched = roles
            .update_one(
                &filter_eq("code", role),
                &Update::AddToSet {
                    field: "permissions".to_string(),
                    value: Value::String(permission.to_string()),
                },
            )
            .await?;
        self.invalidator.mark_stale();

        if matched == 0 {
            return Ok(None);
        }
        debug!("Granted '{}' to role '{}'", permission, role);
        self.fetch(role).await
    }

    /// Remove a permission from a role's direct grants
    ///
    /// The permission does not have to exist. Returns the updated role, or
    /// `None` when the role does not exist.
    pub async fn revoke(&self, role: &str, permission: &str) -> Result<Option<Role>> {
        let roles = self.roles().await?;
        let matched = roles
            .update_one(
                &filter_eq("code", role),
                &Update::Pull {
                    field: "permissions".to_string(),
                    value: Value::String(permission.to_string()),
                },
            )
            .await?;
        self.invalidator.mark_stale();

        if matched == 0 {
            return Ok(None);
        }
        debug!("Revoked '{}' from role '{}'", permission, role);
        self.fetch(role).await
    }

    /// Delete every role
    pub async fn clear(&self) -> Result<u64> {
        let roles = self.roles().await?;
        self.invalidator.mark_stale();
        roles.delete_many(&Filter::new()).await
    }

    async fn check_references(
        &self,
        roles: &dyn Collection,
        code: &str,
        permissions: &[String],
        inherited: &[String],
    ) -> Result<()> {
        if inherited.iter().any(|parent| parent == code) {
            return Err(AuthzError::Validation(format!(
                "Role '{}' cannot inherit itself",
                code
            )));
        }
        let permission_collection = self.permissions().await?;
        ensure_exist(permission_collection.as_ref(), permissions, "Permission").await?;
        ensure_exist(roles, inherited, ENTITY).await
    }
}
