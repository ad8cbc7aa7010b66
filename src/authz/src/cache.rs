//! Invalidation-flagged rule cache
//!
//! Holds the last resolved [`RuleTable`] behind an `Arc` that is swapped in
//! one step, plus a process-wide staleness flag. Mutations only set the flag
//! (through a [`CacheInvalidator`]); the next reader pulls a rebuild.
//!
//! The flag is cleared *before* the rebuild reads storage. A mutation that
//! lands while the rebuild is running sets it again, so the next check
//! rebuilds once more instead of trusting a table that missed the change.
//! A rebuild that fails or is dropped mid-load puts the flag back.

use crate::error::Result;
use crate::hierarchy::{resolve, IncludesExpansion, RuleTable};
use crate::types::{Permission, Role};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Source of the full entity graph
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// Every stored permission and role
    async fn load_rules(&self) -> Result<(Vec<Permission>, Vec<Role>)>;
}

/// Immutable resolved snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSnapshot {
    /// Role code to resolved entry
    pub table: RuleTable,

    /// Rebuild counter; 0 means never built
    pub generation: u64,
}

/// Handle that marks the cache stale; held by every mutation path
#[derive(Debug, Clone)]
pub struct CacheInvalidator {
    stale: Arc<AtomicBool>,
}

impl CacheInvalidator {
    /// Flag the cache for rebuild on the next read
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }
}

/// Statistics about cache behaviour
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Reads served without a rebuild
    pub hits: u64,
    /// Successful rebuilds
    pub rebuilds: u64,
    /// Rebuilds that failed while loading rules
    pub failures: u64,
    /// Roles in the current table
    pub roles: usize,
    /// Generation of the current table
    pub generation: u64,
}

impl CacheStats {
    /// Fraction of reads served from the current table
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.rebuilds;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Process-wide cache of the resolved decision table
pub struct RuleCache {
    stale: Arc<AtomicBool>,
    snapshot: RwLock<Arc<RuleSnapshot>>,
    rebuild: Mutex<()>,
    expansion: IncludesExpansion,
    hits: AtomicU64,
    rebuilds: AtomicU64,
    failures: AtomicU64,
}

impl RuleCache {
    /// Create an empty cache; it starts stale so the first read builds it
    pub fn new(expansion: IncludesExpansion) -> Self {
        Self {
            stale: Arc::new(AtomicBool::new(true)),
            snapshot: RwLock::new(Arc::new(RuleSnapshot::default())),
            rebuild: Mutex::new(()),
            expansion,
            hits: AtomicU64::new(0),
            rebuilds: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Handle for mutation paths
    pub fn invalidator(&self) -> CacheInvalidator {
        CacheInvalidator {
            stale: self.stale.clone(),
        }
    }

    /// Mark the cache stale
    pub fn invalidate(&self) {
        self.stale.store(true, Ordering::Release);
    }

    /// Whether the next read will rebuild
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// The current snapshot, without freshness checks
    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        self.snapshot.read().clone()
    }

    /// Return a snapshot no older than the last observed mutation
    ///
    /// Cheap when fresh. When stale, the caller waits for one rebuild;
    /// concurrent stale readers share it. A failed load leaves the cache
    /// stale and the previous snapshot in place.
    pub async fn ensure_fresh(&self, source: &dyn RuleSource) -> Result<Arc<RuleSnapshot>> {
        if !self.is_stale() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(self.snapshot());
        }

        let _guard = self.rebuild.lock().await;

        // Rebuilt by another caller while we waited for the lock
        if !self.stale.swap(false, Ordering::AcqRel) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(self.snapshot());
        }
        let mut restore = RestoreStale::new(&self.stale);

        let (permissions, roles) = match source.load_rules().await {
            Ok(rules) => rules,
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Rule cache rebuild failed: {}", err);
                return Err(err);
            }
        };

        let table = resolve(&permissions, &roles, self.expansion);
        let generation = self.snapshot.read().generation + 1;
        let snapshot = Arc::new(RuleSnapshot { table, generation });

        *self.snapshot.write() = snapshot.clone();
        restore.disarm();
        self.rebuilds.fetch_add(1, Ordering::Relaxed);

        info!(
            "Rule cache rebuilt: {} roles, {} permissions, generation {}",
            roles.len(),
            permissions.len(),
            generation
        );
        if self.is_stale() {
            debug!("Rules changed during rebuild; next read rebuilds again");
        }

        Ok(snapshot)
    }

    /// Cache statistics
    pub fn stats(&self) -> CacheStats {
        let snapshot = self.snapshot();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            roles: snapshot.table.len(),
            generation: snapshot.generation,
        }
    }
}

/// Sets the stale flag again on drop unless the new snapshot was published.
/// Covers a failed load and a caller whose future is dropped mid-rebuild.
struct RestoreStale<'a> {
    stale: &'a AtomicBool,
    armed: bool,
}

impl<'a> RestoreStale<'a> {
    fn new(stale: &'a AtomicBool) -> Self {
        Self { stale, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RestoreStale<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.stale.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthzError;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct StaticSource {
        permissions: Vec<Permission>,
        roles: Vec<Role>,
        loads: AtomicUsize,
        fail: AtomicBool,
        /// Loads sleep this long while non-zero, in milliseconds
        delay_ms: AtomicU64,
    }

    impl StaticSource {
        fn new() -> Self {
            Self {
                permissions: vec![Permission::new("doc.read", "Read docs")],
                roles: vec![Role::new("user", "User").with_permissions(["doc.read"])],
                loads: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay_ms: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl RuleSource for StaticSource {
        async fn load_rules(&self) -> Result<(Vec<Permission>, Vec<Role>)> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(AuthzError::Database("store offline".to_string()));
            }
            Ok((self.permissions.clone(), self.roles.clone()))
        }
    }

    #[tokio::test]
    async fn test_starts_stale_and_builds_once() {
        let cache = RuleCache::new(IncludesExpansion::Single);
        let source = StaticSource::new();
        assert!(cache.is_stale());

        let first = cache.ensure_fresh(&source).await.unwrap();
        let second = cache.ensure_fresh(&source).await.unwrap();

        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.generation, 1);
        assert!(!cache.is_stale());
    }

    #[tokio::test]
    async fn test_invalidator_forces_rebuild() {
        let cache = RuleCache::new(IncludesExpansion::Single);
        let source = StaticSource::new();
        let invalidator = cache.invalidator();

        let first = cache.ensure_fresh(&source).await.unwrap();
        invalidator.mark_stale();
        let second = cache.ensure_fresh(&source).await.unwrap();

        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
        assert_eq!(second.generation, 2);
        assert_eq!(first.table, second.table);
    }

    #[tokio::test]
    async fn test_failed_rebuild_stays_stale() {
        let cache = RuleCache::new(IncludesExpansion::Single);
        let source = StaticSource::new();

        let built = cache.ensure_fresh(&source).await.unwrap();
        cache.invalidate();
        source.fail.store(true, Ordering::SeqCst);

        let result = cache.ensure_fresh(&source).await;
        assert!(matches!(result, Err(AuthzError::Database(_))));
        assert!(cache.is_stale());
        assert!(Arc::ptr_eq(&cache.snapshot(), &built));

        source.fail.store(false, Ordering::SeqCst);
        let rebuilt = cache.ensure_fresh(&source).await.unwrap();
        assert_eq!(rebuilt.generation, 2);

        let stats = cache.stats();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.rebuilds, 2);
        assert_eq!(stats.roles, 1);
    }

    #[tokio::test]
    async fn test_concurrent_stale_readers_share_one_rebuild() {
        let cache = Arc::new(RuleCache::new(IncludesExpansion::Single));
        let source = Arc::new(StaticSource::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let source = source.clone();
            handles.push(tokio::spawn(async move {
                cache.ensure_fresh(source.as_ref()).await.map(|s| s.generation)
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 1);
        }
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abandoned_rebuild_leaves_cache_stale() {
        let cache = RuleCache::new(IncludesExpansion::Single);
        let source = StaticSource::new();
        source.delay_ms.store(200, Ordering::SeqCst);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), cache.ensure_fresh(&source)).await;
        assert!(abandoned.is_err());
        assert!(cache.is_stale());
        assert_eq!(cache.snapshot().generation, 0);

        source.delay_ms.store(0, Ordering::SeqCst);
        let rebuilt = cache.ensure_fresh(&source).await.unwrap();
        assert_eq!(rebuilt.generation, 1);
        assert_eq!(rebuilt.table.len(), 1);
        assert!(!cache.is_stale());
        assert_eq!(cache.stats().rebuilds, 1);
    }
}
