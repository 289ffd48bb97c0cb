//! Pool capability traits and their implementations.
//!
//! The registry and the transaction manager only ever talk to a node
//! through [`Pool`] and to an open transaction through [`Transaction`].
//! Two implementations ship with the crate:
//!
//! - [`PgNode`]: a network-backed `sqlx::PgPool` for one PostgreSQL node.
//! - [`MemoryPool`]: a deterministic in-process double that records every
//!   begin, commit, rollback and statement.

use std::future::Future;

use crate::config::PoolConfig;
use crate::error::DbError;

pub mod memory;
pub mod postgres;
#[cfg(test)]
pub(crate) mod tracked;

pub use memory::{MemoryPool, MemoryStats, MemoryTransaction};
pub use postgres::{PgNode, PgTransaction};

/// An open database transaction.
///
/// Both terminal operations consume the transaction; a handle can be
/// finished at most once.
pub trait Transaction: Send + 'static {
    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Commit`] if the database rejects the commit.
    fn commit(self) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Rollback`] if the rollback cannot be delivered.
    fn rollback(self) -> impl Future<Output = Result<(), DbError>> + Send;
}

/// A managed set of connections to one database node.
pub trait Pool: Send + Sync + Sized + 'static {
    /// Transaction type produced by [`Pool::begin`].
    type Tx: Transaction;

    /// Opens a pool for `node` using the limits in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connect`] if the address is invalid or the node
    /// cannot be reached.
    fn open(node: &str, config: &PoolConfig)
    -> impl Future<Output = Result<Self, DbError>> + Send;

    /// Acquires a connection and begins a transaction on it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Begin`] on network failure or pool exhaustion,
    /// [`DbError::PoolClosed`] once the pool has been closed.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx, DbError>> + Send;

    /// Closes every connection and rejects future `begin` calls.
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Log-safe description of the node (never includes credentials).
    fn label(&self) -> &str;
}
