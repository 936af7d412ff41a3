//! Transaction contexts.
//!
//! A [`TransactionContext`] owns one open sqlx transaction, which is bound to a
//! single pooled connection for its whole life. Contexts are shared through
//! `Arc`: the caller keeps one handle to commit or roll back, and a facade may
//! hold another while the transaction is attached to it.
//!
//! Commit and rollback consume the driver handle, so once either has run the
//! context can no longer execute anything. Statements routed to a finished
//! context fail with [`DbError::Transaction`]. They never fall back to the pool.

use crate::db::params::{mysql_query, postgres_query, sqlite_query};
use crate::db::pool::DbPool;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, JsonRow, QueryParam, TransactionInfo, TransactionState};
use chrono::{DateTime, Utc};
use sqlx::{MySql, Postgres, Sqlite, Transaction};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Database-specific transaction wrapper.
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    /// Begin a transaction on a connection taken from `pool`.
    pub async fn begin(pool: &DbPool) -> DbResult<Self> {
        let tx = match pool {
            DbPool::MySql(p) => DbTransaction::MySql(p.begin().await?),
            DbPool::Postgres(p) => DbTransaction::Postgres(p.begin().await?),
            DbPool::SQLite(p) => DbTransaction::SQLite(p.begin().await?),
        };
        Ok(tx)
    }

    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbTransaction::MySql(_) => DatabaseType::MySQL,
            DbTransaction::Postgres(_) => DatabaseType::PostgreSQL,
            DbTransaction::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub async fn commit(self) -> DbResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.commit().await.map_err(DbError::from),
            DbTransaction::Postgres(tx) => tx.commit().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.commit().await.map_err(DbError::from),
        }
    }

    pub async fn rollback(self) -> DbResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.rollback().await.map_err(DbError::from),
            DbTransaction::Postgres(tx) => tx.rollback().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.rollback().await.map_err(DbError::from),
        }
    }

    async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<JsonRow>> {
        let rows: Vec<JsonRow> = match self {
            DbTransaction::MySql(tx) => mysql_query(sql, params)
                .fetch_all(&mut **tx)
                .await?
                .iter()
                .map(RowToJson::to_json_map)
                .collect(),
            DbTransaction::Postgres(tx) => postgres_query(sql, params)
                .fetch_all(&mut **tx)
                .await?
                .iter()
                .map(RowToJson::to_json_map)
                .collect(),
            DbTransaction::SQLite(tx) => sqlite_query(sql, params)
                .fetch_all(&mut **tx)
                .await?
                .iter()
                .map(RowToJson::to_json_map)
                .collect(),
        };
        Ok(rows)
    }

    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let rows_affected = match self {
            DbTransaction::MySql(tx) => mysql_query(sql, params)
                .execute(&mut **tx)
                .await?
                .rows_affected(),
            DbTransaction::Postgres(tx) => postgres_query(sql, params)
                .execute(&mut **tx)
                .await?
                .rows_affected(),
            DbTransaction::SQLite(tx) => sqlite_query(sql, params)
                .execute(&mut **tx)
                .await?
                .rows_affected(),
        };
        Ok(rows_affected)
    }
}

struct TransactionSlot {
    state: TransactionState,
    /// Present exactly while `state` is `Active`.
    transaction: Option<DbTransaction>,
}

/// One open transaction bound to a specific pool generation.
pub struct TransactionContext {
    id: String,
    generation: String,
    db_type: DatabaseType,
    started_at: DateTime<Utc>,
    slot: Mutex<TransactionSlot>,
}

impl TransactionContext {
    /// Begin a transaction on `pool`, recording the pool generation it belongs to.
    ///
    /// Crate-internal so the generation always comes from the manager's slot.
    /// Callers begin transactions through
    /// [`ConnectionFacade::begin_transaction`](crate::db::ConnectionFacade::begin_transaction).
    pub(crate) async fn begin(pool: &DbPool, generation: impl Into<String>) -> DbResult<Arc<Self>> {
        let transaction = DbTransaction::begin(pool).await?;
        let context = Arc::new(Self {
            id: generate_transaction_id(),
            generation: generation.into(),
            db_type: transaction.db_type(),
            started_at: Utc::now(),
            slot: Mutex::new(TransactionSlot {
                state: TransactionState::Active,
                transaction: Some(transaction),
            }),
        });

        info!(
            transaction_id = %context.id,
            generation = %context.generation,
            db_type = %context.db_type,
            "Transaction started"
        );

        Ok(context)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Pool generation this transaction was begun on.
    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub async fn state(&self) -> TransactionState {
        self.slot.lock().await.state
    }

    pub async fn is_active(&self) -> bool {
        self.state().await.is_active()
    }

    pub async fn info(&self) -> TransactionInfo {
        TransactionInfo {
            id: self.id.clone(),
            generation: self.generation.clone(),
            db_type: self.db_type,
            started_at: self.started_at,
            state: self.state().await,
        }
    }

    /// Commit the transaction. Terminal: the context cannot be used afterwards.
    ///
    /// A failed commit still ends the transaction; the state becomes
    /// `RolledBack` and the driver error is returned.
    pub async fn commit(&self) -> DbResult<()> {
        let mut slot = self.slot.lock().await;
        let transaction = self.take_active(&mut slot)?;

        match transaction.commit().await {
            Ok(()) => {
                slot.state = TransactionState::Committed;
                info!(transaction_id = %self.id, "Transaction committed");
                Ok(())
            }
            Err(e) => {
                slot.state = TransactionState::RolledBack;
                warn!(transaction_id = %self.id, error = %e, "Commit failed, transaction ended");
                Err(e)
            }
        }
    }

    /// Roll the transaction back. Terminal: the context cannot be used afterwards.
    pub async fn rollback(&self) -> DbResult<()> {
        let mut slot = self.slot.lock().await;
        let transaction = self.take_active(&mut slot)?;

        // The driver discards the transaction even if the ROLLBACK round-trip fails.
        slot.state = TransactionState::RolledBack;
        transaction.rollback().await?;

        info!(transaction_id = %self.id, "Transaction rolled back");
        Ok(())
    }

    /// Run a statement on the transaction's connection and collect its rows.
    pub(crate) async fn fetch_all(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<JsonRow>> {
        let mut slot = self.slot.lock().await;
        let transaction = self.active_mut(&mut slot)?;
        let rows = transaction.fetch_all(sql, params).await?;

        debug!(
            transaction_id = %self.id,
            row_count = rows.len(),
            "Queried in transaction"
        );
        Ok(rows)
    }

    /// Run a statement on the transaction's connection and report rows affected.
    pub(crate) async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let mut slot = self.slot.lock().await;
        let transaction = self.active_mut(&mut slot)?;
        let rows_affected = transaction.execute(sql, params).await?;

        debug!(
            transaction_id = %self.id,
            rows_affected = rows_affected,
            "Executed in transaction"
        );
        Ok(rows_affected)
    }

    fn active_mut<'a>(&self, slot: &'a mut TransactionSlot) -> DbResult<&'a mut DbTransaction> {
        match (slot.state, slot.transaction.as_mut()) {
            (TransactionState::Active, Some(transaction)) => Ok(transaction),
            (state, _) => Err(self.ended_error(state)),
        }
    }

    fn take_active(&self, slot: &mut TransactionSlot) -> DbResult<DbTransaction> {
        if slot.state.is_ended() {
            return Err(self.ended_error(slot.state));
        }
        slot.transaction
            .take()
            .ok_or_else(|| self.ended_error(slot.state))
    }

    fn ended_error(&self, state: TransactionState) -> DbError {
        DbError::transaction(
            format!("Transaction is no longer active ({})", state),
            &self.id,
        )
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("db_type", &self.db_type)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;
    use tokio_test::assert_ok;

    async fn memory_pool() -> DbPool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        DbPool::SQLite(pool)
    }

    #[test]
    fn test_transaction_id_format() {
        let id = generate_transaction_id();
        assert!(id.starts_with("tx_"));
        assert_eq!(id.len(), 3 + 32);
    }

    #[tokio::test]
    async fn test_begin_starts_active() {
        let pool = memory_pool().await;
        let tx = TransactionContext::begin(&pool, "pool_a").await.unwrap();
        assert_eq!(tx.state().await, TransactionState::Active);
        assert_eq!(tx.generation(), "pool_a");
        assert_eq!(tx.db_type(), DatabaseType::SQLite);

        let info = tx.info().await;
        assert_eq!(info.id, tx.id());
        assert!(info.state.is_active());
    }

    #[tokio::test]
    async fn test_commit_is_terminal() {
        let pool = memory_pool().await;
        let tx = TransactionContext::begin(&pool, "pool_a").await.unwrap();
        assert_ok!(tx.execute("CREATE TABLE hosts (name TEXT)", &[]).await);
        assert_ok!(tx.commit().await);
        assert_eq!(tx.state().await, TransactionState::Committed);

        let again = tx.commit().await.unwrap_err();
        assert!(matches!(again, DbError::Transaction { .. }));
        let rollback = tx.rollback().await.unwrap_err();
        assert!(matches!(rollback, DbError::Transaction { .. }));
        assert_eq!(tx.state().await, TransactionState::Committed);
    }

    #[tokio::test]
    async fn test_rollback_discards_work() {
        let pool = memory_pool().await;
        pool.execute("CREATE TABLE hosts (name TEXT)", &[])
            .await
            .unwrap();

        let tx = TransactionContext::begin(&pool, "pool_a").await.unwrap();
        tx.execute(
            "INSERT INTO hosts (name) VALUES (?)",
            &[QueryParam::from("db1")],
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(tx.state().await, TransactionState::RolledBack);

        let rows = pool
            .fetch_all("SELECT COUNT(*) AS n FROM hosts", &[])
            .await
            .unwrap();
        assert_eq!(rows[0]["n"], serde_json::json!(0));
    }

    #[tokio::test]
    async fn test_failed_commit_ends_transaction() {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let pool = DbPool::SQLite(
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await
                .unwrap(),
        );
        pool.execute("CREATE TABLE hosts (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();
        pool.execute(
            "CREATE TABLE checks (host_id INTEGER REFERENCES hosts(id) \
             DEFERRABLE INITIALLY DEFERRED)",
            &[],
        )
        .await
        .unwrap();

        // The dangling reference is only caught at COMMIT.
        let tx = TransactionContext::begin(&pool, "pool_a").await.unwrap();
        assert_ok!(tx.execute("INSERT INTO checks (host_id) VALUES (42)", &[]).await);

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, DbError::Database { .. }));
        assert_eq!(tx.state().await, TransactionState::RolledBack);

        let again = tx.commit().await.unwrap_err();
        assert!(matches!(again, DbError::Transaction { .. }));
        assert!(again.to_string().contains("rolled_back"));
    }

    #[tokio::test]
    async fn test_queries_rejected_after_end() {
        let pool = memory_pool().await;
        let tx = TransactionContext::begin(&pool, "pool_a").await.unwrap();
        tx.rollback().await.unwrap();

        let err = tx.fetch_all("SELECT 1", &[]).await.unwrap_err();
        assert!(err.to_string().contains("no longer active"));
        assert!(err.to_string().contains(tx.id()));
    }
}
