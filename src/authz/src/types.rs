//! Core rule types: permissions, roles and the identities that hold them

use crate::error::{AuthzError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Unique role code
pub type RoleId = String;

/// Unique permission code
pub type PermissionId = String;

/// Opaque key/value bag carried by permissions and roles
pub type Meta = Map<String, Value>;

/// Stored permission record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    /// Storage-assigned identifier
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Unique, immutable permission code (e.g., "doc.read")
    pub code: PermissionId,

    /// Human readable name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    /// Finer-grained permissions this umbrella permission stands for
    #[serde(default)]
    pub includes: Vec<PermissionId>,
}

impl Permission {
    /// Create a permission record without storage identity
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: None,
            code: code.into(),
            name: name.into(),
            description: None,
            meta: None,
            includes: Vec::new(),
        }
    }

    /// Set the included permission codes
    pub fn with_includes<I, S>(mut self, includes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.includes = includes.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this permission is an umbrella over other permissions
    pub fn is_umbrella(&self) -> bool {
        !self.includes.is_empty()
    }
}

/// Stored role record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    /// Storage-assigned identifier
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Unique, immutable role code (e.g., "editor")
    pub code: RoleId,

    /// Human readable name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    /// Permissions granted directly to this role
    #[serde(default)]
    pub permissions: Vec<PermissionId>,

    /// Roles whose permissions are also granted to this role
    #[serde(default)]
    pub inherited: Vec<RoleId>,

    /// Pass-through attributes handed to the decision engine
    #[serde(default)]
    pub attributes: Vec<Value>,
}

impl Role {
    /// Create a role record without storage identity
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: None,
            code: code.into(),
            name: name.into(),
            description: None,
            meta: None,
            permissions: Vec::new(),
            inherited: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Set the directly granted permission codes
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    /// Set the inherited role codes
    pub fn with_inherited<I, S>(mut self, inherited: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inherited = inherited.into_iter().map(Into::into).collect();
        self
    }
}

/// Fields accepted by permission `create` and `update`
///
/// Every field is optional so that `update` can apply a partial replacement;
/// `create` requires `code` and `name`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<PermissionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub includes: Option<Vec<PermissionId>>,
}

impl PermissionInput {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_includes<I, S>(mut self, includes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.includes = Some(includes.into_iter().map(Into::into).collect());
        self
    }

    /// Parse untyped input, rejecting wrongly shaped fields
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| AuthzError::Validation(format!("Malformed permission: {}", e)))
    }
}

/// Fields accepted by role `create` and `update`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<RoleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<PermissionId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherited: Option<Vec<RoleId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<Value>>,
}

impl RoleInput {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = Some(permissions.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_inherited<I, S>(mut self, inherited: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inherited = Some(inherited.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_attributes(mut self, attributes: Vec<Value>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Parse untyped input, rejecting wrongly shaped fields
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| AuthzError::Validation(format!("Malformed role: {}", e)))
    }
}

/// Principal supplied by the surrounding application
///
/// The rule store never persists identities; only the role codes are read
/// at decision time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Principal identifier (e.g., "user:alice")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Role codes held directly by the principal
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

impl Identity {
    /// Create an identity holding the given roles
    pub fn with_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: None,
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn named(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Bulk import payload: permissions are applied before roles
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub permissions: Vec<PermissionInput>,
    #[serde(default)]
    pub roles: Vec<RoleInput>,
}

impl Seed {
    /// Parse a seed from JSON text
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| AuthzError::Validation(format!("Malformed seed: {}", e)))
    }

    /// Parse a seed from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| AuthzError::Validation(format!("Malformed seed: {}", e)))
    }
}
