//! Error types for connection acquisition and query routing.
//!
//! All fallible operations return [`DbResult`]. Driver errors coming out of
//! sqlx are classified once, in the `From<sqlx::Error>` impl, keeping the
//! original message and SQLSTATE so callers can inspect the root cause.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// The pool could not be built, or a pooled connection was lost.
    #[error("Connection failed: {message}")]
    Connection {
        message: String,
        suggestion: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    /// The server rejected a statement.
    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("Transaction error: {message} (transaction: {transaction_id})")]
    Transaction {
        message: String,
        transaction_id: String,
    },

    #[error("Timed out waiting for a pooled connection")]
    PoolTimeout,

    /// A result column could not be read.
    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
            source: None,
        }
    }

    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            source: None,
        }
    }

    pub fn transaction(message: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Attach the driver error this one was classified from. Only connection
    /// and database errors keep it; other variants are returned unchanged.
    pub fn with_source(mut self, err: sqlx::Error) -> Self {
        match &mut self {
            Self::Connection { source, .. } | Self::Database { source, .. } => *source = Some(err),
            _ => {}
        }
        self
    }

    /// The underlying sqlx error, when one was kept.
    pub fn driver_error(&self) -> Option<&sqlx::Error> {
        match self {
            Self::Connection { source, .. } | Self::Database { source, .. } => source.as_ref(),
            _ => None,
        }
    }

    /// A hint for the operator, when one can be given.
    ///
    /// Connection errors carry their own. Server errors are hinted from the
    /// SQLSTATE class.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { sql_state, .. } => sql_state.as_deref().and_then(sql_state_hint),
            Self::PoolTimeout => Some("Raise acquire_timeout or max_connections"),
            _ => None,
        }
    }

    /// SQLSTATE reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Whether acquiring a new connection and retrying can help.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::PoolTimeout => true,
            // 40001 serialization failure, 40P01 deadlock
            Self::Database { sql_state, .. } => {
                matches!(sql_state.as_deref(), Some("40001" | "40P01"))
            }
            _ => false,
        }
    }
}

/// Hint for a SQLSTATE, keyed on its two-character class.
fn sql_state_hint(sql_state: &str) -> Option<&'static str> {
    match sql_state.get(..2)? {
        "08" => Some("The server dropped the connection; acquire a new one"),
        "22" => Some("Check parameter values against the column types"),
        "23" => Some("The statement violates a constraint"),
        "25" => Some("The statement is not valid in the current transaction state"),
        "28" => Some("Verify the username and password in the connection string"),
        "40" => Some("The transaction was rolled back by the server; retry it"),
        "42" => Some("Check the SQL syntax and referenced objects"),
        _ => None,
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        let classified = match &err {
            sqlx::Error::Database(db_err) => {
                DbError::database(db_err.message(), db_err.code().map(|c| c.into_owned()))
            }
            sqlx::Error::PoolClosed => DbError::connection(
                "Connection pool is closed",
                "Acquire a new connection from the manager",
            ),
            sqlx::Error::PoolTimedOut => DbError::PoolTimeout,
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {io_err}"),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {tls_err}"),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {msg}"),
                "Check database server compatibility",
            ),
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::ColumnNotFound(col) => DbError::decode(format!("Column not found: {col}")),
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => {
                DbError::decode(format!("Column index {index} out of bounds (len: {len})"))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::decode(format!("Failed to decode column {index}: {source}"))
            }
            sqlx::Error::Decode(source) => DbError::decode(source.to_string()),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::decode(format!("Type not found: {type_name}"))
            }
            sqlx::Error::RowNotFound => DbError::database("No rows returned", None),
            other => DbError::internal(other.to_string()),
        };
        classified.with_source(err)
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_carries_suggestion() {
        let err = DbError::connection("connection refused", "Check the server");
        assert!(err.to_string().starts_with("Connection failed"));
        assert_eq!(err.suggestion(), Some("Check the server"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_database_error_hint_from_sql_state() {
        let err = DbError::database("relation \"hosts\" does not exist", Some("42P01".into()));
        assert_eq!(err.sql_state(), Some("42P01"));
        assert_eq!(
            err.suggestion(),
            Some("Check the SQL syntax and referenced objects")
        );
        assert!(!err.is_retryable());

        let unknown = DbError::database("odd", Some("XX000".into()));
        assert!(unknown.suggestion().is_none());
        assert!(DbError::database("odd", None).suggestion().is_none());
    }

    #[test]
    fn test_serialization_failure_is_retryable() {
        assert!(DbError::database("could not serialize", Some("40001".into())).is_retryable());
        assert!(DbError::database("deadlock detected", Some("40P01".into())).is_retryable());
        assert!(!DbError::transaction("ended", "tx_1").is_retryable());
    }

    #[test]
    fn test_pool_errors_map_to_acquisition_errors() {
        let closed: DbError = sqlx::Error::PoolClosed.into();
        assert!(matches!(closed, DbError::Connection { .. }));

        let timed_out: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(timed_out, DbError::PoolTimeout));
        assert!(timed_out.is_retryable());
    }

    #[test]
    fn test_driver_error_kept_as_source() {
        use std::error::Error as _;

        let err: DbError = sqlx::Error::PoolClosed.into();
        let source = err.source().expect("connection error keeps its driver error");
        assert!(matches!(
            source.downcast_ref::<sqlx::Error>(),
            Some(sqlx::Error::PoolClosed)
        ));
        assert!(matches!(err.driver_error(), Some(sqlx::Error::PoolClosed)));

        let built = DbError::connection("refused", "Check the server");
        assert!(built.source().is_none());
    }

    #[test]
    fn test_column_errors_map_to_decode() {
        let err: DbError = sqlx::Error::ColumnNotFound("name".into()).into();
        assert!(matches!(err, DbError::Decode { .. }));
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_transaction_error_names_transaction() {
        let err = DbError::transaction("Transaction is no longer active", "tx_abc");
        let msg = err.to_string();
        assert!(msg.contains("no longer active"));
        assert!(msg.contains("tx_abc"));
    }
}
