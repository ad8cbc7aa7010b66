//! # Rolekeep Authorization Rules
//!
//! Role-based access control rule store with a lazily rebuilt decision cache.
//!
//! ## Features
//!
//! - **Entity store** for permissions and roles with referential integrity
//! - **Hierarchy resolution** of role inheritance and umbrella permissions
//! - **Lazy connection** shared by concurrent first callers
//! - **Invalidation-flagged cache** rebuilt on the next check after a mutation
//! - **Provider trait** consumed by an external decision engine
//!
//! ## Example
//!
//! ```rust
//! use rolekeep_authz::{Rbac, RbacConfig, Identity, PermissionInput, RoleInput, RequestContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rbac = Rbac::from_config(RbacConfig::default())?;
//!
//!     rbac.permissions().create(PermissionInput::new("doc.read", "Read docs")).await?;
//!     rbac.permissions().create(PermissionInput::new("doc.edit", "Edit docs")).await?;
//!     rbac.roles().create(RoleInput::new("user", "User").with_permissions(["doc.read"])).await?;
//!     rbac.roles()
//!         .create(
//!             RoleInput::new("editor", "Editor")
//!                 .with_inherited(["user"])
//!                 .with_permissions(["doc.edit"]),
//!         )
//!         .await?;
//!
//!     let ctx = RequestContext::new().with_principal(Identity::with_roles(["editor"]));
//!     let auth = rbac.authorize(&ctx).await?;
//!
//!     assert!(auth.granted().contains("doc.read"));
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod connection;
pub mod entities;
pub mod error;
pub mod hierarchy;
pub mod identity;
pub mod provider;
pub mod rbac;
pub mod store;  // Document storage backends
pub mod types;

// Re-export commonly used types
pub use types::{
    Identity, Permission, PermissionId, PermissionInput, Role, RoleId, RoleInput, Seed,
};
pub use cache::{CacheStats, RuleCache, RuleSnapshot, RuleSource};
pub use config::RbacConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use entities::{PermissionStore, RoleStore};
pub use error::{AuthzError, Result};
pub use hierarchy::{IncludesExpansion, RuleEntry, RuleTable};
pub use identity::{IdentityFn, RequestContext};
pub use provider::{RoleProvider, RuleProvider};
pub use rbac::{Authorization, Rbac};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
