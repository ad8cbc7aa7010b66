//! Role and permission hierarchy resolution
//!
//! Flattens the stored entity graph into a decision table: for every role,
//! the set of permission codes it holds once `inherited` roles and umbrella
//! permissions (`includes`) are expanded.
//!
//! # Algorithm
//!
//! For each role:
//! 1. Breadth-first walk over `inherited`, tracking visited role codes so a
//!    cycle in stored data cannot loop forever
//! 2. Collect the directly granted `permissions` of every visited role
//! 3. Substitute each umbrella permission with the codes it includes
//!
//! Output uses ordered collections so the same graph always produces the
//! same table, byte for byte.

use crate::types::{Permission, PermissionId, Role, RoleId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use tracing::warn;

/// How umbrella permissions are expanded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncludesExpansion {
    /// Replace an umbrella permission with its direct `includes` only
    #[default]
    Single,

    /// Follow `includes` of included permissions down to leaf permissions
    Transitive,
}

/// Resolved rule entry for one role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    /// Flattened permission codes
    pub permissions: BTreeSet<PermissionId>,

    /// Roles this role inherits directly, as stored
    pub inherited: Vec<RoleId>,

    /// Pass-through attributes
    pub attributes: Vec<Value>,
}

/// Decision table: role code to resolved entry
pub type RuleTable = BTreeMap<RoleId, RuleEntry>;

/// Flattens permission and role definitions into a [`RuleTable`]
pub struct HierarchyResolver<'a> {
    permissions: HashMap<&'a str, &'a Permission>,
    roles: HashMap<&'a str, &'a Role>,
    expansion: IncludesExpansion,
}

impl<'a> HierarchyResolver<'a> {
    /// Index the entity graph for resolution
    pub fn new(permissions: &'a [Permission], roles: &'a [Role], expansion: IncludesExpansion) -> Self {
        Self {
            permissions: permissions.iter().map(|p| (p.code.as_str(), p)).collect(),
            roles: roles.iter().map(|r| (r.code.as_str(), r)).collect(),
            expansion,
        }
    }

    /// Resolve every role into the decision table
    pub fn resolve_all(&self) -> RuleTable {
        self.roles
            .values()
            .map(|role| {
                let entry = RuleEntry {
                    permissions: self.resolve_role(&role.code),
                    inherited: role.inherited.clone(),
                    attributes: role.attributes.clone(),
                };
                (role.code.clone(), entry)
            })
            .collect()
    }

    /// Flattened permission set of one role; empty for unknown roles
    pub fn resolve_role(&self, code: &str) -> BTreeSet<PermissionId> {
        let mut granted: BTreeSet<PermissionId> = BTreeSet::new();
        for role in self.ancestry(code) {
            for permission in &role.permissions {
                self.expand_into(permission, &mut granted);
            }
        }
        granted
    }

    /// The role itself followed by every role reachable through `inherited`
    fn ancestry(&self, code: &str) -> Vec<&'a Role> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut lineage = Vec::new();

        queue.push_back(code);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            let Some(role) = self.roles.get(current).copied() else {
                if current != code {
                    warn!("Role '{}' inherits unknown role '{}', skipping", code, current);
                }
                continue;
            };
            lineage.push(role);
            for parent in &role.inherited {
                if !visited.contains(parent.as_str()) {
                    queue.push_back(parent.as_str());
                }
            }
        }

        lineage
    }

    /// Add `code` to `granted`, substituting umbrella permissions
    fn expand_into(&self, code: &str, granted: &mut BTreeSet<PermissionId>) {
        let Some(permission) = self.permissions.get(code).copied() else {
            // Dangling grant; the entity store normally prevents this
            granted.insert(code.to_string());
            return;
        };

        if !permission.is_umbrella() {
            granted.insert(code.to_string());
            return;
        }

        match self.expansion {
            IncludesExpansion::Single => {
                granted.extend(permission.includes.iter().cloned());
            }
            IncludesExpansion::Transitive => {
                let mut visited: HashSet<&str> = HashSet::new();
                self.expand_transitive(permission, &mut visited, granted);
            }
        }
    }

    fn expand_transitive(
        &self,
        umbrella: &'a Permission,
        visited: &mut HashSet<&'a str>,
        granted: &mut BTreeSet<PermissionId>,
    ) {
        if !visited.insert(umbrella.code.as_str()) {
            return;
        }
        for included in &umbrella.includes {
            match self.permissions.get(included.as_str()).copied() {
                Some(child) if child.is_umbrella() => {
                    self.expand_transitive(child, visited, granted)
                }
                _ => {
                    granted.insert(included.clone());
                }
            }
        }
    }
}

/// Resolve a full entity graph into a decision table
pub fn resolve(permissions: &[Permission], roles: &[Role], expansion: IncludesExpansion) -> RuleTable {
    HierarchyResolver::new(permissions, roles, expansion).resolve_all()
}
