//! Per-request entry point wiring storage, cache and provider together

use crate::cache::{CacheStats, RuleCache};
use crate::config::RbacConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::entities::{PermissionStore, Repository, RoleStore};
use crate::error::Result;
use crate::identity::{principal_identity, IdentityFn, RequestContext};
use crate::provider::RuleProvider;
use crate::store::Connector;
use crate::types::{Identity, PermissionId, Seed};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Resolved identity plus the provider its roles are checked against
#[derive(Debug, Clone)]
pub struct Authorization {
    pub identity: Identity,
    pub provider: RuleProvider,
}

impl Authorization {
    /// Every permission the identity holds through its roles
    ///
    /// Input for a decision engine; this crate does not make the allow call.
    pub fn granted(&self) -> BTreeSet<PermissionId> {
        self.provider.granted(&self.identity)
    }
}

/// Role-based access control rule store
///
/// # Example
///
/// ```no_run
/// use rolekeep_authz::{Rbac, RbacConfig, RequestContext, Identity, RoleProvider};
///
/// # async fn example() -> rolekeep_authz::Result<()> {
/// let rbac = Rbac::from_config(RbacConfig::default())?;
/// let ctx = RequestContext::new().with_principal(Identity::with_roles(["editor"]));
///
/// let auth = rbac.authorize(&ctx).await?;
/// let permissions = auth.provider.get_permissions("editor");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Rbac {
    config: RbacConfig,
    connection: Arc<ConnectionManager>,
    cache: Arc<RuleCache>,
    repository: Repository,
    identity: IdentityFn,
}

impl Rbac {
    /// Create a rule store over an explicit connector
    pub fn new(config: RbacConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;

        let collections = &config.collections;
        let connection = Arc::new(ConnectionManager::new(
            connector,
            vec![collections.permissions.clone(), collections.roles.clone()],
            config.retry_interval(),
        ));
        let cache = Arc::new(RuleCache::new(config.resolver.includes));
        let repository = Repository::new(
            connection.clone(),
            &collections.permissions,
            &collections.roles,
            cache.invalidator(),
        );

        Ok(Self {
            config,
            connection,
            cache,
            repository,
            identity: principal_identity(),
        })
    }

    /// Create a rule store over the configured backend
    pub fn from_config(config: RbacConfig) -> Result<Self> {
        let connector = config.connector()?;
        Self::new(config, connector)
    }

    /// Replace the identity function
    pub fn with_identity<F>(mut self, identity: F) -> Self
    where
        F: Fn(&RequestContext) -> Result<Identity> + Send + Sync + 'static,
    {
        self.identity = Arc::new(identity);
        self
    }

    pub fn config(&self) -> &RbacConfig {
        &self.config
    }

    pub fn permissions(&self) -> &PermissionStore {
        &self.repository.permissions
    }

    pub fn roles(&self) -> &RoleStore {
        &self.repository.roles
    }

    /// Provider bound to a snapshot reflecting every mutation made so far
    pub async fn provider(&self) -> Result<RuleProvider> {
        self.connection.database().await?;
        let snapshot = self.cache.ensure_fresh(&self.repository).await?;
        Ok(RuleProvider::new(snapshot))
    }

    /// Resolve the request identity and a fresh provider for it
    pub async fn authorize(&self, ctx: &RequestContext) -> Result<Authorization> {
        let identity = (self.identity)(ctx)?;
        let provider = self.provider().await?;
        Ok(Authorization { identity, provider })
    }

    /// Upsert every permission, then every role
    ///
    /// Stops at the first failure; records applied before it stay applied.
    pub async fn import(&self, seed: Seed) -> Result<()> {
        let (permissions, roles) = (seed.permissions.len(), seed.roles.len());

        for permission in seed.permissions {
            self.repository.permissions.update(permission).await?;
        }
        for role in seed.roles {
            self.repository.roles.update(role).await?;
        }

        info!("Imported {} permissions and {} roles", permissions, roles);
        Ok(())
    }

    /// Delete every permission and role
    pub async fn clear(&self) -> Result<()> {
        futures::try_join!(
            self.repository.roles.clear(),
            self.repository.permissions.clear()
        )?;
        Ok(())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn is_stale(&self) -> bool {
        self.cache.is_stale()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }
}
