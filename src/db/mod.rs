//! Database access layer.
//!
//! - `manager`: owns one pool and re-establishes it lazily
//! - `acquire`: hands out connection facades from a manager
//! - `facade`: routes each statement to the pool or an attached transaction
//! - `transaction`: stateful transaction contexts
//! - `connector`: builds sqlx pools from configuration
//! - `pool`, `params`, `types`: driver dispatch, parameter binding, row decoding

pub mod acquire;
pub mod connector;
pub mod facade;
pub mod manager;
pub mod params;
pub mod pool;
pub mod transaction;
pub mod types;

pub use acquire::{Acquisition, acquire};
pub use connector::{PoolConnector, SqlxConnector};
pub use facade::ConnectionFacade;
pub use manager::{ConnectionManager, PoolSlot};
pub use pool::DbPool;
pub use transaction::{DbTransaction, TransactionContext};
