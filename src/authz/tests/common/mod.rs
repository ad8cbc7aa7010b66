//! Shared fixtures: the docs/roles reference data set
#![allow(dead_code)]

use rolekeep_authz::store::MemoryConnector;
use rolekeep_authz::{PermissionInput, Rbac, RbacConfig, RoleInput, Seed};
use std::sync::Arc;

/// Docs and role-management permissions with two umbrellas (`DM`, `RM`),
/// and the role chain `S -> A -> E` plus the standalone `U`
pub fn reference_seed() -> Seed {
    Seed {
        permissions: vec![
            PermissionInput::new("DA", "Docs adding"),
            PermissionInput::new("DR", "Docs reading"),
            PermissionInput::new("DE", "Docs editing"),
            PermissionInput::new("DD", "Docs deleting"),
            PermissionInput::new("DM", "Docs management")
                .with_description("Manage docs (CRUD)")
                .with_includes(["DA", "DR", "DE", "DD"]),
            PermissionInput::new("IR", "Invoke role"),
            PermissionInput::new("RR", "Revoke role"),
            PermissionInput::new("FR", "Fetch role"),
            PermissionInput::new("RM", "Role management").with_includes(["IR", "RR", "FR"]),
        ],
        roles: vec![
            RoleInput::new("U", "User").with_permissions(["DA", "DR"]),
            RoleInput::new("E", "Editor").with_permissions(["DM", "DA"]),
            RoleInput::new("A", "Admin")
                .with_inherited(["E"])
                .with_permissions(["FR"]),
            RoleInput::new("S", "Super manager")
                .with_description("The highest role.")
                .with_inherited(["A"])
                .with_permissions(["RM"]),
        ],
    }
}

/// Rule store over a fresh in-memory backend
pub fn memory_rbac(config: RbacConfig) -> (Rbac, Arc<MemoryConnector>) {
    let connector = Arc::new(MemoryConnector::new());
    let rbac = Rbac::new(config, connector.clone()).expect("valid config");
    (rbac, connector)
}

/// Rule store seeded with the reference data
pub async fn seeded_rbac() -> (Rbac, Arc<MemoryConnector>) {
    let (rbac, connector) = memory_rbac(RbacConfig::default());
    rbac.import(reference_seed()).await.expect("seed import");
    (rbac, connector)
}

/// Sorted owned codes, matching `get_permissions` output order
pub fn codes(items: &[&str]) -> Vec<String> {
    let mut codes: Vec<String> = items.iter().map(|c| c.to_string()).collect();
    codes.sort();
    codes
}
