//! Crate error type.
//!
//! [`DbError`] is the single error enum for pool lookup, pool lifecycle,
//! transaction control and configuration. Lookup and no-transaction
//! failures are distinct variants so callers can match on them without
//! inspecting connectivity errors.

/// Errors produced by the registry, the pools and the transaction manager.
///
/// # Categories
///
/// | Variant                          | Category       |
/// |----------------------------------|----------------|
/// | `UnknownPool`                    | Lookup         |
/// | `NoTransaction`, `TransactionClosed` | Transaction state |
/// | `NoNodes`, `Config`, `MissingConfig` | Configuration |
/// | `Connect`, `Begin`, `Commit`, `Rollback`, `PoolClosed` | Connectivity |
/// | `Query`                          | Statement execution |
/// | `Migrate`                        | Schema migrations |
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// No pool set is registered under the given name.
    #[error("unknown pool: {0}")]
    UnknownPool(String),

    /// Commit or rollback was requested but the context carries no
    /// transaction handle.
    #[error("no transaction in context")]
    NoTransaction,

    /// The handle in context was already committed or rolled back.
    #[error("transaction already finished")]
    TransactionClosed,

    /// A pool configuration listed no node addresses.
    #[error("pool configuration has no nodes")]
    NoNodes,

    /// Opening a single node failed, either while parsing its address or
    /// while connecting.
    #[error("failed to open node {node}: {source}")]
    Connect {
        /// Log-safe node description.
        node: String,
        /// Driver error.
        #[source]
        source: sqlx::Error,
    },

    /// The pool could not begin a transaction.
    #[error("failed to begin transaction: {0}")]
    Begin(#[source] sqlx::Error),

    /// The transaction could not be committed.
    #[error("failed to commit transaction: {0}")]
    Commit(#[source] sqlx::Error),

    /// The transaction could not be rolled back.
    #[error("failed to roll back transaction: {0}")]
    Rollback(#[source] sqlx::Error),

    /// A statement executed inside a unit of work failed.
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// The pool was closed before the operation.
    #[error("pool is closed")]
    PoolClosed,

    /// A configuration value could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A required configuration key is missing.
    #[error("config key \"{0}\" is required")]
    MissingConfig(String),

    /// The migration engine failed.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    /// Returns `true` for failures reported by the database or the
    /// connection pool rather than by this crate's own bookkeeping.
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::Begin(_)
                | Self::Commit(_)
                | Self::Rollback(_)
                | Self::PoolClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_pool_is_not_connectivity() {
        let err = DbError::UnknownPool("missing".to_string());
        assert!(!err.is_connectivity());
        assert_eq!(err.to_string(), "unknown pool: missing");
    }

    #[test]
    fn begin_failure_is_connectivity() {
        let err = DbError::Begin(sqlx::Error::PoolTimedOut);
        assert!(err.is_connectivity());
        assert!(err.to_string().starts_with("failed to begin transaction"));
    }

    #[test]
    fn missing_config_names_the_key() {
        let err = DbError::MissingConfig("PGSQL_DEFAULT_NODES".to_string());
        assert_eq!(
            err.to_string(),
            "config key \"PGSQL_DEFAULT_NODES\" is required"
        );
    }
}
