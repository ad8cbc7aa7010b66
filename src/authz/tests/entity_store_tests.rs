//! Entity store: validation, uniqueness, referential integrity and cascades

mod common;

use common::{memory_rbac, seeded_rbac};
use rolekeep_authz::store::filter_eq;
use rolekeep_authz::{AuthzError, PermissionInput, RbacConfig, RoleInput};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

// ============================================================================
// VALIDATION
// ============================================================================

#[tokio::test]
async fn test_create_requires_code_and_name() {
    let (rbac, _) = memory_rbac(RbacConfig::default());

    let missing_name = PermissionInput {
        code: Some("DR".to_string()),
        ..Default::default()
    };
    let err = assert_err!(rbac.permissions().create(missing_name).await);
    assert!(matches!(err, AuthzError::Validation(_)));

    let missing_code = RoleInput {
        name: Some("User".to_string()),
        ..Default::default()
    };
    let err = assert_err!(rbac.roles().create(missing_code).await);
    assert!(matches!(err, AuthzError::Validation(_)));

    let empty_code = RoleInput::new("", "User");
    assert!(matches!(
        rbac.roles().create(empty_code).await,
        Err(AuthzError::Validation(_))
    ));
}

#[tokio::test]
async fn test_malformed_input_is_validation_error() {
    let result = RoleInput::from_value(json!({"code": "U", "name": "User", "inherited": "E"}));
    assert!(matches!(result, Err(AuthzError::Validation(_))));
}

#[tokio::test]
async fn test_role_cannot_inherit_itself() {
    let (rbac, _) = seeded_rbac().await;

    let err = assert_err!(rbac.roles().update(RoleInput {
        code: Some("A".to_string()),
        inherited: Some(vec!["E".to_string(), "A".to_string()]),
        ..Default::default()
    })
    .await);
    assert!(matches!(err, AuthzError::Validation(_)));
}

// ============================================================================
// UNIQUENESS
// ============================================================================

#[tokio::test]
async fn test_duplicate_code_conflicts() {
    let (rbac, _) = memory_rbac(RbacConfig::default());

    let first = assert_ok!(
        rbac.permissions()
            .create(PermissionInput::new("DR", "Docs reading"))
            .await
    );
    assert!(first.id.is_some());

    let err = assert_err!(
        rbac.permissions()
            .create(PermissionInput::new("DR", "Something else"))
            .await
    );
    assert!(matches!(err, AuthzError::Conflict(_)));

    // First record unaffected
    let stored = rbac.permissions().fetch("DR").await.unwrap().unwrap();
    assert_eq!(stored.name, "Docs reading");
    assert_eq!(stored.id, first.id);
}

// ============================================================================
// REFERENTIAL INTEGRITY
// ============================================================================

#[tokio::test]
async fn test_dangling_references_rejected_without_writes() {
    let (rbac, _) = memory_rbac(RbacConfig::default());
    rbac.permissions()
        .create(PermissionInput::new("DR", "Docs reading"))
        .await
        .unwrap();

    let err = assert_err!(
        rbac.permissions()
            .create(PermissionInput::new("DM", "Docs management").with_includes(["DR", "DX"]))
            .await
    );
    assert!(matches!(err, AuthzError::Reference(_)));
    assert!(rbac.permissions().fetch("DM").await.unwrap().is_none());

    let err = assert_err!(
        rbac.roles()
            .create(RoleInput::new("U", "User").with_permissions(["DR", "DX"]))
            .await
    );
    assert!(matches!(err, AuthzError::Reference(_)));

    let err = assert_err!(
        rbac.roles()
            .create(RoleInput::new("A", "Admin").with_inherited(["ghost"]))
            .await
    );
    assert!(matches!(err, AuthzError::Reference(_)));

    assert!(rbac.roles().list(&Default::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_revalidates_references() {
    let (rbac, _) = seeded_rbac().await;

    let err = assert_err!(rbac.roles().update(RoleInput {
        code: Some("U".to_string()),
        permissions: Some(vec!["DR".to_string(), "DX".to_string()]),
        ..Default::default()
    })
    .await);
    assert!(matches!(err, AuthzError::Reference(_)));

    let err = assert_err!(rbac.permissions().update(PermissionInput {
        code: Some("RM".to_string()),
        includes: Some(vec!["IR".to_string(), "DX".to_string()]),
        ..Default::default()
    })
    .await);
    assert!(matches!(err, AuthzError::Reference(_)));

    // Nothing changed
    let user = rbac.roles().fetch("U").await.unwrap().unwrap();
    assert_eq!(user.permissions, vec!["DA".to_string(), "DR".to_string()]);
    let rm = rbac.permissions().fetch("RM").await.unwrap().unwrap();
    assert_eq!(rm.includes.len(), 3);
}

#[tokio::test]
async fn test_grant_requires_existing_permission() {
    let (rbac, _) = seeded_rbac().await;

    let err = assert_err!(rbac.roles().grant("U", "DX").await);
    assert!(matches!(err, AuthzError::Reference(_)));

    let user = rbac.roles().fetch("U").await.unwrap().unwrap();
    assert_eq!(user.permissions, vec!["DA".to_string(), "DR".to_string()]);
}

// ============================================================================
// UPDATE, GRANT, REVOKE
// ============================================================================

#[tokio::test]
async fn test_update_is_partial_and_upserts() {
    let (rbac, _) = seeded_rbac().await;

    let updated = assert_ok!(
        rbac.roles()
            .update(RoleInput {
                code: Some("U".to_string()),
                description: Some("Plain user".to_string()),
                ..Default::default()
            })
            .await
    );
    assert_eq!(updated.name, "User");
    assert_eq!(updated.description.as_deref(), Some("Plain user"));
    assert_eq!(updated.permissions, vec!["DA".to_string(), "DR".to_string()]);

    let created = assert_ok!(
        rbac.roles()
            .update(RoleInput::new("G", "Guest").with_permissions(["DR"]))
            .await
    );
    assert_eq!(created.code, "G");
    assert!(created.id.is_some());
}

#[tokio::test]
async fn test_grant_is_set_like() {
    let (rbac, _) = seeded_rbac().await;

    rbac.roles().grant("U", "DE").await.unwrap();
    let user = rbac.roles().grant("U", "DE").await.unwrap().unwrap();

    assert_eq!(
        user.permissions,
        vec!["DA".to_string(), "DR".to_string(), "DE".to_string()]
    );
}

#[tokio::test]
async fn test_grant_and_revoke_on_unknown_role() {
    let (rbac, _) = seeded_rbac().await;

    assert!(rbac.roles().grant("ghost", "DR").await.unwrap().is_none());
    assert!(rbac.roles().revoke("ghost", "DR").await.unwrap().is_none());
}

#[tokio::test]
async fn test_revoke_tolerates_unknown_permission() {
    let (rbac, _) = seeded_rbac().await;

    let user = rbac.roles().revoke("U", "DX").await.unwrap().unwrap();
    assert_eq!(user.permissions, vec!["DA".to_string(), "DR".to_string()]);

    let user = rbac.roles().revoke("U", "DA").await.unwrap().unwrap();
    assert_eq!(user.permissions, vec!["DR".to_string()]);
}

// ============================================================================
// LIST AND REMOVE
// ============================================================================

#[tokio::test]
async fn test_list_with_filter() {
    let (rbac, _) = seeded_rbac().await;

    let all = rbac.permissions().list(&Default::default()).await.unwrap();
    assert_eq!(all.len(), 9);

    let umbrellas = rbac
        .permissions()
        .list(&filter_eq("includes", json!(["IR", "RR", "FR"])))
        .await
        .unwrap();
    assert_eq!(umbrellas.len(), 1);
    assert_eq!(umbrellas[0].code, "RM");
}

#[tokio::test]
async fn test_remove_permission_retracts_from_roles_and_umbrellas() {
    let (rbac, _) = seeded_rbac().await;

    assert!(rbac.permissions().remove("DA").await.unwrap());

    let user = rbac.roles().fetch("U").await.unwrap().unwrap();
    assert_eq!(user.permissions, vec!["DR".to_string()]);
    let editor = rbac.roles().fetch("E").await.unwrap().unwrap();
    assert_eq!(editor.permissions, vec!["DM".to_string()]);
    let dm = rbac.permissions().fetch("DM").await.unwrap().unwrap();
    assert!(!dm.includes.contains(&"DA".to_string()));

    // Idempotent
    assert!(!rbac.permissions().remove("DA").await.unwrap());
}

#[tokio::test]
async fn test_umbrella_emptied_by_removal_is_removed_too() {
    let (rbac, _) = seeded_rbac().await;

    assert!(rbac.permissions().remove("IR").await.unwrap());
    assert!(rbac.permissions().remove("RR").await.unwrap());
    let rm = rbac.permissions().fetch("RM").await.unwrap().unwrap();
    assert_eq!(rm.includes, vec!["FR".to_string()]);

    // Last member gone: the umbrella follows and is retracted from roles
    assert!(rbac.permissions().remove("FR").await.unwrap());
    assert!(rbac.permissions().fetch("RM").await.unwrap().is_none());
    let manager = rbac.roles().fetch("S").await.unwrap().unwrap();
    assert!(manager.permissions.is_empty());

    // Umbrellas that keep members are untouched
    assert!(rbac.permissions().remove("DA").await.unwrap());
    assert!(rbac.permissions().fetch("DM").await.unwrap().is_some());
}

#[tokio::test]
async fn test_remove_role() {
    let (rbac, _) = seeded_rbac().await;

    assert!(rbac.roles().remove("U").await.unwrap());
    assert!(rbac.roles().fetch("U").await.unwrap().is_none());
    assert!(!rbac.roles().remove("U").await.unwrap());
}

// ============================================================================
// STORAGE FAILURES
// ============================================================================

#[tokio::test]
async fn test_storage_failure_propagates() {
    let (rbac, connector) = seeded_rbac().await;
    connector.database().set_unavailable(true);

    let err = assert_err!(rbac.roles().fetch("U").await);
    assert!(matches!(err, AuthzError::Database(_)));
    assert!(!err.is_client_error());
    assert!(!err.is_unavailable());
}
