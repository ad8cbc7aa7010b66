//! Entity store: CRUD over permissions and roles with referential integrity
//!
//! Every mutating call marks the rule cache stale and nothing more; rebuilds
//! are pulled by the next authorization check, so a bulk import does not
//! rebuild the table once per record.

pub mod permission;
pub mod role;

pub use permission::PermissionStore;
pub use role::RoleStore;

use crate::cache::{CacheInvalidator, RuleSource};
use crate::connection::ConnectionManager;
use crate::error::{AuthzError, Result};
use crate::store::{filter_eq, Collection, Filter};
use crate::types::{Permission, Role};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Both entity stores over one connection
#[derive(Clone)]
pub struct Repository {
    pub permissions: PermissionStore,
    pub roles: RoleStore,
}

impl Repository {
    pub fn new(
        connection: Arc<ConnectionManager>,
        permission_collection: &str,
        role_collection: &str,
        invalidator: CacheInvalidator,
    ) -> Self {
        Self {
            permissions: PermissionStore::new(
                connection.clone(),
                permission_collection,
                role_collection,
                invalidator.clone(),
            ),
            roles: RoleStore::new(connection, role_collection, permission_collection, invalidator),
        }
    }
}

#[async_trait]
impl RuleSource for Repository {
    async fn load_rules(&self) -> Result<(Vec<Permission>, Vec<Role>)> {
        let everything = Filter::new();
        futures::try_join!(self.permissions.list(&everything), self.roles.list(&everything))
    }
}

/// Required string field: present and non-empty
pub(crate) fn required(value: Option<String>, entity: &str, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AuthzError::Validation(format!(
            "{} should have a {}",
            entity, field
        ))),
    }
}

/// Drop repeated codes, keeping first occurrence order
pub(crate) fn dedupe(codes: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    codes.into_iter().filter(|c| seen.insert(c.clone())).collect()
}

/// Fail with `Reference` unless every code exists in `collection`
pub(crate) async fn ensure_exist(collection: &dyn Collection, codes: &[String], entity: &str) -> Result<()> {
    for code in codes {
        if collection.find_one(&filter_eq("code", code.as_str())).await?.is_none() {
            return Err(AuthzError::Reference(format!(
                "{} '{}' does not exist, add it first",
                entity, code
            )));
        }
    }
    Ok(())
}
