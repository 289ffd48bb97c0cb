//! Transaction management with transparent nesting.
//!
//! Callers thread a [`TxContext`] through their code explicitly. The
//! [`TxManager`] derives contexts that carry the active [`TxHandle`], so
//! a unit of work that calls further transactional code simply passes
//! its context on and joins the same physical transaction.
//!
//! ```ignore
//! let manager = TxManager::from_registry(&registry).await?;
//! let ctx = TxContext::new();
//!
//! manager
//!     .with_nested_tx(&ctx, |ctx, tx| async move {
//!         debit(&manager, &ctx, from, amount).await?;
//!         credit(&manager, &ctx, to, amount).await?;
//!         Ok::<_, AppError>(())
//!     })
//!     .await?;
//! ```

pub mod context;
pub mod manager;

pub use context::{TxContext, TxHandle};
pub use manager::TxManager;
