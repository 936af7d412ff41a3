//! Connection acquisition.
//!
//! [`acquire`] is the entry point used by the surrounding adapter: it makes
//! sure the manager's pool is connected and hands back a fresh
//! [`ConnectionFacade`]. Connect failures do not propagate as errors. They
//! come back as [`Acquisition::Failed`] so the caller can branch on the
//! outcome. The opaque `meta` value is returned untouched either way.

use crate::db::connector::PoolConnector;
use crate::db::facade::ConnectionFacade;
use crate::db::manager::ConnectionManager;
use crate::error::{DbError, DbResult};
use tracing::{debug, warn};

/// Outcome of an acquisition.
#[derive(Debug)]
pub enum Acquisition<M = serde_json::Value> {
    /// A connection was acquired. The caller owns it until it is released.
    Success {
        connection: ConnectionFacade,
        meta: Option<M>,
    },
    /// The pool could not be (re)established. `error` carries the driver's
    /// connect error.
    Failed { error: DbError, meta: Option<M> },
}

impl<M> Acquisition<M> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn meta(&self) -> Option<&M> {
        match self {
            Self::Success { meta, .. } | Self::Failed { meta, .. } => meta.as_ref(),
        }
    }

    /// Collapse into a `Result`, dropping the meta passthrough.
    pub fn into_result(self) -> DbResult<ConnectionFacade> {
        match self {
            Self::Success { connection, .. } => Ok(connection),
            Self::Failed { error, .. } => Err(error),
        }
    }
}

/// Acquire a connection from `manager`.
///
/// If the pool is disconnected, exactly one connect attempt is made with the
/// manager's stored configuration before a result is produced.
pub async fn acquire<C, M>(manager: &ConnectionManager<C>, meta: Option<M>) -> Acquisition<M>
where
    C: PoolConnector,
{
    match manager.ensure_connected().await {
        Ok(slot) => {
            debug!(
                connection_id = %manager.config().id,
                generation = %slot.generation,
                "Connection acquired"
            );
            Acquisition::Success {
                connection: ConnectionFacade::new(slot.pool, slot.generation),
                meta,
            }
        }
        Err(error) => {
            warn!(
                connection_id = %manager.config().id,
                error = %error,
                "Could not acquire a connection"
            );
            Acquisition::Failed { error, meta }
        }
    }
}

impl<C: PoolConnector> ConnectionManager<C> {
    /// Method form of [`acquire`].
    pub async fn acquire<M>(&self, meta: Option<M>) -> Acquisition<M> {
        acquire(self, meta).await
    }
}
