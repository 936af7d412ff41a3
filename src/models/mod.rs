//! Data models shared across the crate.

pub mod connection;
pub mod query;

pub use connection::{
    ConnectionConfig, ConnectionConfigError, DatabaseType, TransactionInfo, TransactionState,
};
pub use query::{JsonRow, QueryParam, QueryRoute};
