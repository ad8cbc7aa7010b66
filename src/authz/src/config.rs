//! Rule store configuration loading and validation

use crate::error::{AuthzError, Result};
use crate::hierarchy::IncludesExpansion;
use crate::store::{Connector, MemoryConnector};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const ENV_DATABASE_URL: &str = "ROLEKEEP_DATABASE_URL";
pub const ENV_STORAGE_BACKEND: &str = "ROLEKEEP_STORAGE_BACKEND";
pub const ENV_PERMISSION_COLLECTION: &str = "ROLEKEEP_PERMISSION_COLLECTION";
pub const ENV_ROLE_COLLECTION: &str = "ROLEKEEP_ROLE_COLLECTION";

/// Complete rule store configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RbacConfig {
    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub collections: CollectionSection,

    #[serde(default)]
    pub connection: ConnectionSection,

    #[serde(default)]
    pub resolver: ResolverSection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

impl std::str::FromStr for StorageBackend {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            other => Err(AuthzError::Configuration(format!(
                "Unknown storage backend '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StorageSection {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Connection target; required for `postgres`
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CollectionSection {
    #[serde(default = "default_permission_collection")]
    pub permissions: String,
    #[serde(default = "default_role_collection")]
    pub roles: String,
}

impl Default for CollectionSection {
    fn default() -> Self {
        Self {
            permissions: default_permission_collection(),
            roles: default_role_collection(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConnectionSection {
    /// Bounded wait for callers that arrive while a connect is in flight
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ResolverSection {
    #[serde(default)]
    pub includes: IncludesExpansion,
}

// Default value functions
fn default_max_connections() -> u32 { 5 }
fn default_permission_collection() -> String { "permissions".to_string() }
fn default_role_collection() -> String { "roles".to_string() }
fn default_retry_interval() -> u64 { 100 }

impl RbacConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| AuthzError::Configuration(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Apply `ROLEKEEP_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.storage.url = Some(url);
        }
        if let Some(backend) = lookup(ENV_STORAGE_BACKEND) {
            self.storage.backend = backend.parse()?;
        }
        if let Some(name) = lookup(ENV_PERMISSION_COLLECTION) {
            self.collections.permissions = name;
        }
        if let Some(name) = lookup(ENV_ROLE_COLLECTION) {
            self.collections.roles = name;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Validate collections
        check_collection_name(&self.collections.permissions)?;
        check_collection_name(&self.collections.roles)?;
        if self.collections.permissions == self.collections.roles {
            return Err(AuthzError::Configuration(
                "Permission and role collections must differ".to_string(),
            ));
        }

        // Validate storage
        if self.storage.backend == StorageBackend::Postgres && self.storage.url.is_none() {
            return Err(AuthzError::Configuration(
                "Postgres backend requires storage.url".to_string(),
            ));
        }
        if self.storage.max_connections == 0 {
            return Err(AuthzError::Configuration(
                "storage.max_connections must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.connection.retry_interval_ms)
    }

    /// Build the connector for the configured backend
    pub fn connector(&self) -> Result<Arc<dyn Connector>> {
        match self.storage.backend {
            StorageBackend::Memory => Ok(Arc::new(MemoryConnector::new())),
            #[cfg(feature = "postgres")]
            StorageBackend::Postgres => {
                let url = self.storage.url.clone().ok_or_else(|| {
                    AuthzError::Configuration("Postgres backend requires storage.url".to_string())
                })?;
                Ok(Arc::new(crate::store::PostgresConnector::new(
                    url,
                    self.storage.max_connections,
                )))
            }
            #[cfg(not(feature = "postgres"))]
            StorageBackend::Postgres => Err(AuthzError::Configuration(
                "Built without the `postgres` feature".to_string(),
            )),
        }
    }
}

/// Collection names double as table names, so they must be plain identifiers
fn check_collection_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AuthzError::Configuration(format!(
            "Invalid collection name '{}'",
            name
        )))
    }
}
