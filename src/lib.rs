//! # pgsql-registry
//!
//! PostgreSQL connectivity plumbing: a named registry of connection pools
//! with master/replica read routing, and a transaction manager whose
//! nested scopes collapse onto one physical transaction.
//!
//! ## Architecture
//!
//! ```text
//! Application code
//!     │
//!     ├── TxManager (tx/)        with_tx / with_nested_tx / begin / commit / rollback
//!     │       │
//!     │       └── TxContext      explicit handle + shared depth counter
//!     │
//!     ├── Registry (registry/)   name → PoolSet, one lock for lookup and teardown
//!     │       │
//!     │       └── PoolSet        master + round-robin replicas
//!     │
//!     └── Pool (pool/)           PgNode (sqlx) | MemoryPool (test double)
//! ```

pub mod config;
pub mod error;
pub mod migrate;
pub mod pool;
pub mod registry;
pub mod tx;

pub use config::{Configs, MigrationConfig, PoolConfig};
pub use error::DbError;
pub use pool::{MemoryPool, PgNode, PgTransaction, Pool, Transaction};
pub use registry::{DEFAULT_POOL, PoolSet, Registry, RegistryBuilder};
pub use tx::{TxContext, TxHandle, TxManager};
