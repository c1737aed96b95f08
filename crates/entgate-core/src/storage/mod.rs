//! SQLite storage: connection pool, transactions and statement building.

mod config;
mod database;
mod pool;
pub(crate) mod sql;
mod transaction;

pub use config::{
    DatabaseConfig, DEFAULT_ACQUIRE_TIMEOUT_SECS, DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS,
};
pub use database::Database;
pub use pool::{ConnectionPool, PooledConnection};
pub use sql::{SqlValue, Statement};
pub use transaction::Transaction;
pub(crate) use transaction::{DeferredAudit, DeferredEvent};
