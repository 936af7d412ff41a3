//! Connection manager.
//!
//! A [`ConnectionManager`] owns the configuration for one database and the
//! single pool built from it. The pool is established lazily. An acquisition
//! that finds no pool, or a closed one, makes one connect attempt and stores
//! the result in place for later acquisitions. Facades acquired before a
//! reconnect keep the pool they were given.
//!
//! # Concurrency
//!
//! Reconnects are single-flight. The connect attempt runs under an async
//! mutex, and connectivity is re-checked once the mutex is held. Acquisitions
//! that raced on a disconnected pool therefore share one attempt and one new
//! pool. The slot itself sits behind an `RwLock` that is never held across an
//! await.

use crate::db::connector::{PoolConnector, SqlxConnector};
use crate::db::pool::DbPool;
use crate::error::DbResult;
use crate::models::{ConnectionConfig, DatabaseType};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// The manager's current pool and the generation id it was given.
#[derive(Debug, Clone)]
pub struct PoolSlot {
    pub generation: String,
    pub pool: DbPool,
}

impl PoolSlot {
    fn new(pool: DbPool) -> Self {
        Self {
            generation: generate_generation_id(),
            pool,
        }
    }

    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }
}

pub struct ConnectionManager<C = SqlxConnector> {
    config: ConnectionConfig,
    connector: C,
    slot: RwLock<Option<PoolSlot>>,
    /// Serializes connect attempts.
    connect_lock: Mutex<()>,
    reconnect_attempts: AtomicUsize,
}

impl ConnectionManager<SqlxConnector> {
    /// Create a manager that connects through sqlx on first acquisition.
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_connector(config, SqlxConnector)
    }
}

impl<C: PoolConnector> ConnectionManager<C> {
    /// Create an unconnected manager using a custom connector.
    pub fn with_connector(config: ConnectionConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            slot: RwLock::new(None),
            connect_lock: Mutex::new(()),
            reconnect_attempts: AtomicUsize::new(0),
        }
    }

    /// Create a manager around a pool that was built elsewhere.
    pub fn with_pool(config: ConnectionConfig, connector: C, pool: DbPool) -> Self {
        let mut manager = Self::with_connector(config, connector);
        let slot = PoolSlot::new(pool);
        debug!(
            connection_id = %manager.config.id,
            generation = %slot.generation,
            "Manager created with existing pool"
        );
        manager.slot = RwLock::new(Some(slot));
        manager
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn db_type(&self) -> DatabaseType {
        self.config.db_type
    }

    /// Connect attempts made because an acquisition found the pool disconnected.
    pub fn reconnect_attempts(&self) -> usize {
        self.reconnect_attempts.load(Ordering::Acquire)
    }

    /// Whether a pool exists and has not been closed.
    pub async fn is_connected(&self) -> bool {
        self.slot
            .read()
            .await
            .as_ref()
            .is_some_and(PoolSlot::is_connected)
    }

    /// The current pool slot, if any, connected or not.
    pub async fn current(&self) -> Option<PoolSlot> {
        self.slot.read().await.clone()
    }

    /// Establish the pool eagerly. Does nothing if already connected, and does
    /// not count as a reconnect.
    pub async fn connect(&self) -> DbResult<()> {
        self.establish(false).await.map(|_| ())
    }

    /// Return a connected pool slot, reconnecting once if needed.
    pub(crate) async fn ensure_connected(&self) -> DbResult<PoolSlot> {
        self.establish(true).await
    }

    /// Close the current pool. Facades holding it start failing; the next
    /// acquisition reconnects. Waits for checked-out connections, including
    /// those held by open transactions, to be returned.
    pub async fn close(&self) {
        let slot = self.slot.read().await.clone();
        if let Some(slot) = slot {
            info!(
                connection_id = %self.config.id,
                generation = %slot.generation,
                "Closing connection pool"
            );
            slot.pool.close().await;
        }
    }

    async fn live_slot(&self) -> Option<PoolSlot> {
        self.slot
            .read()
            .await
            .as_ref()
            .filter(|slot| slot.is_connected())
            .cloned()
    }

    async fn establish(&self, count_attempt: bool) -> DbResult<PoolSlot> {
        if let Some(slot) = self.live_slot().await {
            return Ok(slot);
        }

        let _guard = self.connect_lock.lock().await;

        // Another acquisition may have reconnected while we waited.
        if let Some(slot) = self.live_slot().await {
            debug!(
                connection_id = %self.config.id,
                generation = %slot.generation,
                "Pool reconnected concurrently"
            );
            return Ok(slot);
        }

        if count_attempt {
            self.reconnect_attempts.fetch_add(1, Ordering::AcqRel);
        }
        info!(
            connection_id = %self.config.id,
            db_type = %self.config.db_type,
            "Pool disconnected, connecting"
        );

        let pool = match self.connector.connect(&self.config).await {
            Ok(pool) => pool,
            Err(e) => {
                warn!(connection_id = %self.config.id, error = %e, "Connect attempt failed");
                return Err(e);
            }
        };

        let slot = PoolSlot::new(pool);
        let previous = self.slot.write().await.replace(slot.clone());

        info!(
            connection_id = %self.config.id,
            generation = %slot.generation,
            superseded = ?previous.map(|p| p.generation),
            "Connected successfully"
        );
        Ok(slot)
    }
}

impl<C> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connection_id", &self.config.id)
            .field("db_type", &self.config.db_type)
            .field(
                "reconnect_attempts",
                &self.reconnect_attempts.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

fn generate_generation_id() -> String {
    format!("pool_{}", uuid::Uuid::new_v4().simple())
}
