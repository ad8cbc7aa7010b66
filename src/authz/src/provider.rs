//! Read surface handed to the external decision engine

use crate::cache::RuleSnapshot;
use crate::hierarchy::RuleTable;
use crate::types::{Identity, PermissionId, RoleId};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Capability the decision engine consumes
///
/// Inheritance and umbrella expansion are already applied: the permissions
/// of a role are its complete flattened set.
pub trait RoleProvider: Send + Sync {
    /// The identity's directly held role codes, as a presence-only map
    fn get_roles(&self, identity: &Identity) -> BTreeMap<RoleId, ()>;

    /// Flattened permission codes of a role; empty if the role is unknown
    fn get_permissions(&self, role: &str) -> Vec<PermissionId>;

    /// Pass-through attributes of a role; empty if the role is unknown
    fn get_attributes(&self, role: &str) -> Vec<Value>;
}

/// [`RoleProvider`] over one cache snapshot
///
/// Never observes later rebuilds; fetch a new provider after mutations.
#[derive(Debug, Clone)]
pub struct RuleProvider {
    snapshot: Arc<RuleSnapshot>,
}

impl RuleProvider {
    pub fn new(snapshot: Arc<RuleSnapshot>) -> Self {
        Self { snapshot }
    }

    /// Generation of the bound snapshot
    pub fn generation(&self) -> u64 {
        self.snapshot.generation
    }

    /// The full decision table
    pub fn table(&self) -> &RuleTable {
        &self.snapshot.table
    }

    /// Union of the permissions of every role the identity holds
    ///
    /// A convenience for callers and tests. The allow decision belongs to
    /// the decision engine consuming [`RoleProvider`], not to this helper.
    pub fn granted(&self, identity: &Identity) -> BTreeSet<PermissionId> {
        identity
            .roles
            .iter()
            .filter_map(|role| self.snapshot.table.get(role))
            .flat_map(|entry| entry.permissions.iter().cloned())
            .collect()
    }

    /// Whether any of the identity's roles holds `permission`
    ///
    /// Convenience lookup only; it is not the decision algorithm.
    pub fn has_permission(&self, identity: &Identity, permission: &str) -> bool {
        identity.roles.iter().any(|role| {
            self.snapshot
                .table
                .get(role)
                .is_some_and(|entry| entry.permissions.contains(permission))
        })
    }
}

impl RoleProvider for RuleProvider {
    fn get_roles(&self, identity: &Identity) -> BTreeMap<RoleId, ()> {
        identity.roles.iter().map(|role| (role.clone(), ())).collect()
    }

    fn get_permissions(&self, role: &str) -> Vec<PermissionId> {
        self.snapshot
            .table
            .get(role)
            .map(|entry| entry.permissions.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn get_attributes(&self, role: &str) -> Vec<Value> {
        self.snapshot
            .table
            .get(role)
            .map(|entry| entry.attributes.clone())
            .unwrap_or_default()
    }
}
