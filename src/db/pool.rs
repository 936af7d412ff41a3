//! Database-specific connection pools.
//!
//! [`DbPool`] wraps the concrete sqlx pools (avoiding `AnyPool` limitations)
//! and is the capability set a [`ConnectionFacade`](super::ConnectionFacade)
//! passes through. Cloning is cheap: every clone refers to the same
//! underlying pool.

use crate::db::params::{mysql_query, postgres_query, sqlite_query};
use crate::db::types::RowToJson;
use crate::error::DbResult;
use crate::models::{DatabaseType, JsonRow, QueryParam};
use futures_util::TryStreamExt;
use sqlx::{MySqlPool, PgPool, SqlitePool};

/// Database-specific connection pool.
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Whether the pool has been closed. A closed pool counts as disconnected.
    pub fn is_closed(&self) -> bool {
        match self {
            DbPool::MySql(pool) => pool.is_closed(),
            DbPool::Postgres(pool) => pool.is_closed(),
            DbPool::SQLite(pool) => pool.is_closed(),
        }
    }

    /// Close the pool. Every clone observes the closure.
    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::SQLite(pool) => pool.close().await,
        }
    }

    /// Number of connections currently held by the pool (idle and in use).
    pub fn size(&self) -> u32 {
        match self {
            DbPool::MySql(pool) => pool.size(),
            DbPool::Postgres(pool) => pool.size(),
            DbPool::SQLite(pool) => pool.size(),
        }
    }

    /// Number of idle connections.
    pub fn num_idle(&self) -> usize {
        match self {
            DbPool::MySql(pool) => pool.num_idle(),
            DbPool::Postgres(pool) => pool.num_idle(),
            DbPool::SQLite(pool) => pool.num_idle(),
        }
    }

    pub fn as_mysql(&self) -> Option<&MySqlPool> {
        match self {
            DbPool::MySql(pool) => Some(pool),
            _ => None,
        }
    }

    pub fn as_postgres(&self) -> Option<&PgPool> {
        match self {
            DbPool::Postgres(pool) => Some(pool),
            _ => None,
        }
    }

    pub fn as_sqlite(&self) -> Option<&SqlitePool> {
        match self {
            DbPool::SQLite(pool) => Some(pool),
            _ => None,
        }
    }

    /// Run a statement on any pooled connection and collect its rows.
    pub(crate) async fn fetch_all(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<JsonRow>> {
        let rows: Vec<JsonRow> = match self {
            DbPool::MySql(pool) => {
                mysql_query(sql, params)
                    .fetch(pool)
                    .map_ok(|row| row.to_json_map())
                    .try_collect()
                    .await?
            }
            DbPool::Postgres(pool) => {
                postgres_query(sql, params)
                    .fetch(pool)
                    .map_ok(|row| row.to_json_map())
                    .try_collect()
                    .await?
            }
            DbPool::SQLite(pool) => {
                sqlite_query(sql, params)
                    .fetch(pool)
                    .map_ok(|row| row.to_json_map())
                    .try_collect()
                    .await?
            }
        };
        Ok(rows)
    }

    /// Run a statement on any pooled connection and report rows affected.
    pub(crate) async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let result = match self {
            DbPool::MySql(pool) => mysql_query(sql, params).execute(pool).await?.rows_affected(),
            DbPool::Postgres(pool) => postgres_query(sql, params)
                .execute(pool)
                .await?
                .rows_affected(),
            DbPool::SQLite(pool) => sqlite_query(sql, params).execute(pool).await?.rows_affected(),
        };
        Ok(result)
    }
}
