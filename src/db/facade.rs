//! Transaction-aware connection facade.
//!
//! A [`ConnectionFacade`] is what an acquisition hands back to the caller. It
//! wraps a clone of the manager's pool and adds one piece of private state:
//! an optional attached [`TransactionContext`]. Every `query`/`execute` call
//! checks that slot afresh. With a transaction attached the statement runs on
//! the transaction's connection, otherwise on any pooled connection. The
//! caller's code has the same shape in both cases.
//!
//! Everything else the pool can do is reachable unchanged through
//! [`ConnectionFacade::pool`] or `Deref<Target = DbPool>`.

use crate::db::pool::DbPool;
use crate::db::transaction::TransactionContext;
use crate::error::{DbError, DbResult};
use crate::models::{JsonRow, QueryParam, QueryRoute};
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ConnectionFacade {
    pool: DbPool,
    generation: String,
    current_transaction: Option<Arc<TransactionContext>>,
}

impl ConnectionFacade {
    /// Wrap a pool of the given generation with no transaction attached.
    pub(crate) fn new(pool: DbPool, generation: impl Into<String>) -> Self {
        Self {
            pool,
            generation: generation.into(),
            current_transaction: None,
        }
    }

    /// The wrapped pool. Shared with the manager and other facades; never closed here.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Generation of the pool this facade was acquired from.
    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn current_transaction(&self) -> Option<&Arc<TransactionContext>> {
        self.current_transaction.as_ref()
    }

    /// Route subsequent statements to `transaction`.
    ///
    /// Replaces any transaction already attached; attachments do not nest.
    /// A transaction begun on a different pool generation is rejected.
    ///
    /// Generations are assigned by the manager and cannot be supplied from
    /// outside the crate, so a transaction can only carry the generation of
    /// the pool it was actually begun on:
    ///
    /// ```compile_fail
    /// use db_connection_core::{DbPool, TransactionContext};
    ///
    /// async fn begin_elsewhere(pool: &DbPool, generation: &str) {
    ///     let _ = TransactionContext::begin(pool, generation).await;
    /// }
    /// ```
    ///
    /// ```compile_fail
    /// use db_connection_core::{ConnectionFacade, DbPool};
    ///
    /// fn wrap(pool: DbPool) -> ConnectionFacade {
    ///     ConnectionFacade::new(pool, "pool_0")
    /// }
    /// ```
    pub fn attach_transaction(&mut self, transaction: Arc<TransactionContext>) -> DbResult<()> {
        if transaction.generation() != self.generation {
            return Err(DbError::transaction(
                format!(
                    "Transaction belongs to a different connection (pool {}, expected {})",
                    transaction.generation(),
                    self.generation
                ),
                transaction.id(),
            ));
        }

        if let Some(previous) = self.current_transaction.replace(transaction) {
            debug!(
                transaction_id = %previous.id(),
                "Replaced attached transaction"
            );
        }
        Ok(())
    }

    /// Route subsequent statements back to the pool.
    ///
    /// Returns the transaction that was attached, if any. Detaching with
    /// nothing attached is a no-op.
    pub fn detach_transaction(&mut self) -> Option<Arc<TransactionContext>> {
        self.current_transaction.take()
    }

    /// Where the next statement will run.
    pub fn route(&self) -> QueryRoute {
        match &self.current_transaction {
            Some(tx) => QueryRoute::Transaction(tx.id().to_string()),
            None => QueryRoute::Pool,
        }
    }

    /// Run a statement and collect its rows.
    ///
    /// Driver errors are returned as-is. If the attached transaction has
    /// already been committed or rolled back, this fails with
    /// [`DbError::Transaction`] and does not fall back to the pool.
    pub async fn query(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<JsonRow>> {
        debug!(
            route = %self.route(),
            sql = %sql,
            param_types = ?param_types(params),
            "Routing query"
        );
        match &self.current_transaction {
            Some(tx) => tx.fetch_all(sql, params).await,
            None => self.pool.fetch_all(sql, params).await,
        }
    }

    /// Run a statement and report rows affected. Routed like [`query`](Self::query).
    pub async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        debug!(
            route = %self.route(),
            sql = %sql,
            param_types = ?param_types(params),
            "Routing execute"
        );
        match &self.current_transaction {
            Some(tx) => tx.execute(sql, params).await,
            None => self.pool.execute(sql, params).await,
        }
    }

    /// Begin a transaction on this facade's pool without attaching it.
    pub async fn begin_transaction(&self) -> DbResult<Arc<TransactionContext>> {
        TransactionContext::begin(&self.pool, self.generation.clone()).await
    }

    /// Give the facade back. Pooled connections return to the pool as their
    /// handles drop; an attached transaction that is still active rolls back
    /// once its last handle goes away.
    pub async fn release(mut self) {
        if let Some(tx) = self.detach_transaction() {
            if tx.is_active().await {
                warn!(
                    transaction_id = %tx.id(),
                    "Connection released with an active transaction attached"
                );
            }
        }
        debug!(generation = %self.generation, "Connection released");
    }
}

fn param_types(params: &[QueryParam]) -> Vec<&'static str> {
    params.iter().map(QueryParam::type_name).collect()
}

impl Deref for ConnectionFacade {
    type Target = DbPool;

    fn deref(&self) -> &DbPool {
        &self.pool
    }
}

impl std::fmt::Debug for ConnectionFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFacade")
            .field("pool", &self.pool)
            .field("generation", &self.generation)
            .field(
                "current_transaction",
                &self.current_transaction.as_ref().map(|tx| tx.id()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn facade(generation: &str) -> ConnectionFacade {
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        ConnectionFacade::new(DbPool::SQLite(pool), generation)
    }

    #[tokio::test]
    async fn test_new_facade_routes_to_pool() {
        let f = facade("pool_a").await;
        assert_eq!(f.route(), QueryRoute::Pool);
        assert!(f.current_transaction().is_none());
    }

    #[tokio::test]
    async fn test_detach_without_attachment_is_noop() {
        let mut f = facade("pool_a").await;
        assert!(f.detach_transaction().is_none());
        assert!(f.detach_transaction().is_none());
        assert_eq!(f.route(), QueryRoute::Pool);
    }

    #[tokio::test]
    async fn test_attach_switches_route() {
        let mut f = facade("pool_a").await;
        let tx = f.begin_transaction().await.unwrap();
        f.attach_transaction(tx.clone()).unwrap();
        assert_eq!(f.route(), QueryRoute::Transaction(tx.id().to_string()));

        let detached = f.detach_transaction().unwrap();
        assert_eq!(detached.id(), tx.id());
        assert_eq!(f.route(), QueryRoute::Pool);
    }

    #[tokio::test]
    async fn test_attach_rejects_foreign_transaction() {
        let mut f = facade("pool_a").await;
        let other = facade("pool_b").await;
        let foreign = other.begin_transaction().await.unwrap();

        let err = f.attach_transaction(foreign).unwrap_err();
        assert!(matches!(err, DbError::Transaction { .. }));
        assert_eq!(f.route(), QueryRoute::Pool);
    }

    #[tokio::test]
    async fn test_passthrough_via_deref() {
        let f = facade("pool_a").await;
        assert_eq!(f.db_type(), crate::models::DatabaseType::SQLite);
        assert!(!f.is_closed());
        assert!(f.as_sqlite().is_some());
    }
}
