//! Lazy storage connection with single-initiator semantics
//!
//! The manager is a three-state machine held in one atomic:
//!
//! ```text
//! disconnected ──(first caller)──▶ connecting ──(ok)──▶ connected
//!       ▲                              │
//!       └────────────(error)───────────┘
//! ```
//!
//! Callers that arrive while an attempt is in flight wait at most one retry
//! interval. If the attempt is still running after that, exactly one waiter
//! claims the takeover and connects itself; the rest keep waiting. Each
//! takeover doubles the wait before the next one, so a store slower than the
//! retry interval sees a handful of attempts rather than one per caller.
//!
//! A live connection that drops is not re-established here; storage calls
//! on it fail with [`AuthzError::Database`].

use crate::error::{AuthzError, Result};
use crate::store::{Connector, Database};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

const DISCONNECTED: u8 = 0;
const CONNECTING: u8 = 1;
const CONNECTED: u8 = 2;

/// Cap on the takeover backoff exponent
const MAX_BACKOFF_SHIFT: u32 = 6;

/// Field carrying the uniqueness constraint in every collection
const IDENTITY_FIELD: &str = "code";

/// Observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            CONNECTING => ConnectionState::Connecting,
            CONNECTED => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Lazily connects to storage on first use
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    state: AtomicU8,
    database: RwLock<Option<Arc<dyn Database>>>,
    settled: Notify,
    retry_interval: Duration,
    indexed_collections: Vec<String>,
    attempts: AtomicUsize,
    /// Takeovers of the current connecting phase; claimed by CAS
    takeovers: AtomicU32,
}

impl ConnectionManager {
    /// Create a manager; no connection is attempted until [`Self::database`]
    ///
    /// # Arguments
    ///
    /// * `connector` - Storage connector
    /// * `collections` - Collections whose `code` uniqueness is (re)established on connect
    /// * `retry_interval` - Bounded wait for callers arriving mid-attempt
    pub fn new(
        connector: Arc<dyn Connector>,
        collections: Vec<String>,
        retry_interval: Duration,
    ) -> Self {
        Self {
            connector,
            state: AtomicU8::new(DISCONNECTED),
            database: RwLock::new(None),
            settled: Notify::new(),
            retry_interval,
            indexed_collections: collections,
            attempts: AtomicUsize::new(0),
            takeovers: AtomicU32::new(0),
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Connection attempts initiated through this manager
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }

    /// The live connection, establishing it if needed
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Connection`] to the caller whose attempt failed.
    /// The state is reset to disconnected so a later caller may retry.
    pub async fn database(&self) -> Result<Arc<dyn Database>> {
        loop {
            if let Some(database) = self.current() {
                return Ok(database);
            }

            match self.state.compare_exchange(
                DISCONNECTED,
                CONNECTING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.takeovers.store(0, Ordering::Release);
                    return self.connect().await;
                }
                Err(CONNECTED) => continue,
                Err(_) => {}
            }

            // Another caller is connecting: wait, then re-check
            let takeovers = self.takeovers.load(Ordering::Acquire);
            let wait = self
                .retry_interval
                .saturating_mul(1 << takeovers.min(MAX_BACKOFF_SHIFT));
            let settled = self.settled.notified();
            if self.state.load(Ordering::Acquire) != CONNECTING {
                continue;
            }
            if tokio::time::timeout(wait, settled).await.is_ok() {
                // Settled either way; pick up the handle or compete to retry
                continue;
            }

            if self.state.load(Ordering::Acquire) == CONNECTING
                && self
                    .takeovers
                    .compare_exchange(takeovers, takeovers + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                warn!(
                    "Connection attempt to {} still pending after {:?}, taking over",
                    self.connector.describe(),
                    wait
                );
                return self.connect().await;
            }
        }
    }

    fn current(&self) -> Option<Arc<dyn Database>> {
        if self.state.load(Ordering::Acquire) != CONNECTED {
            return None;
        }
        self.database.read().clone()
    }

    /// Run one attempt; caller has already moved the state to connecting
    async fn connect(&self) -> Result<Arc<dyn Database>> {
        self.attempts.fetch_add(1, Ordering::AcqRel);
        debug!("Connecting to {}", self.connector.describe());

        match self.establish().await {
            Ok(database) => {
                let database = {
                    let mut slot = self.database.write();
                    // A takeover may already have won; keep the first live handle
                    slot.get_or_insert_with(|| database.clone()).clone()
                };
                self.state.store(CONNECTED, Ordering::Release);
                self.settled.notify_waiters();
                info!("Connected to {}", self.connector.describe());
                Ok(database)
            }
            Err(err) => {
                let _ = self.state.compare_exchange(
                    CONNECTING,
                    DISCONNECTED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                self.settled.notify_waiters();
                warn!("Connection to {} failed: {}", self.connector.describe(), err);
                Err(match err {
                    AuthzError::Connection(msg) => AuthzError::Connection(msg),
                    other => AuthzError::Connection(other.to_string()),
                })
            }
        }
    }

    async fn establish(&self) -> Result<Arc<dyn Database>> {
        let database = self.connector.connect().await?;
        for collection in &self.indexed_collections {
            database
                .ensure_unique_index(collection, IDENTITY_FIELD)
                .await?;
        }
        Ok(database)
    }
}
