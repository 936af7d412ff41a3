//! Connection acquisition for pooled SQL databases.
//!
//! A [`ConnectionManager`] owns one lazily (re)connected pool. [`acquire`]
//! turns it into a [`ConnectionFacade`], a handle whose `query` runs either on
//! the pool or on an attached [`TransactionContext`]. Callers write their
//! query code once and decide separately whether it runs inside a
//! transaction.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use db::{
    Acquisition, ConnectionFacade, ConnectionManager, DbPool, PoolConnector, SqlxConnector,
    TransactionContext, acquire,
};
pub use error::{DbError, DbResult};
pub use models::{ConnectionConfig, QueryParam, QueryRoute, TransactionState};
