//! Explicit transaction context threaded through units of work.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::error::DbError;
use crate::pool::Transaction;

/// Shared handle to one physical transaction.
///
/// Every clone refers to the same transaction. Once it has been committed
/// or rolled back, [`TxHandle::lock`] fails with
/// [`DbError::TransactionClosed`].
pub struct TxHandle<T> {
    inner: Arc<Mutex<Option<T>>>,
}

impl<T: Transaction> TxHandle<T> {
    pub(crate) fn new(tx: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Locks the live transaction for statement execution.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TransactionClosed`] if the transaction has
    /// already been finished.
    pub async fn lock(&self) -> Result<MappedMutexGuard<'_, T>, DbError> {
        MutexGuard::try_map(self.inner.lock().await, Option::as_mut)
            .map_err(|_| DbError::TransactionClosed)
    }

    /// Returns `true` once the transaction was committed or rolled back.
    pub async fn is_finished(&self) -> bool {
        self.inner.lock().await.is_none()
    }

    pub(crate) async fn commit(&self) -> Result<(), DbError> {
        self.take().await?.commit().await
    }

    pub(crate) async fn rollback(&self) -> Result<(), DbError> {
        self.take().await?.rollback().await
    }

    async fn take(&self) -> Result<T, DbError> {
        self.inner
            .lock()
            .await
            .take()
            .ok_or(DbError::TransactionClosed)
    }

    /// Returns `true` if both handles refer to the same transaction.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for TxHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for TxHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxHandle")
            .field("refs", &Arc::strong_count(&self.inner))
            .finish()
    }
}

/// Per-call-tree transaction state.
///
/// A context optionally carries the active [`TxHandle`] and always
/// carries a nesting-depth cell. The cell is created once by
/// [`TxContext::new`] and shared by every context derived from it, so
/// concurrent branches of one call tree never race to initialise it.
pub struct TxContext<T> {
    tx: Option<TxHandle<T>>,
    depth: Arc<AtomicI32>,
}

impl<T> TxContext<T> {
    /// Creates a root context with no transaction and depth zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tx: None,
            depth: Arc::new(AtomicI32::new(0)),
        }
    }

    /// Returns the active transaction handle, if any.
    #[must_use]
    pub fn handle(&self) -> Option<&TxHandle<T>> {
        self.tx.as_ref()
    }

    /// Returns `true` if a transaction handle is present.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Number of nested scopes currently open on this call tree.
    #[must_use]
    pub fn depth(&self) -> i32 {
        self.depth.load(Ordering::SeqCst)
    }

    /// Derives a context carrying `tx` and sharing this context's depth
    /// cell.
    pub(crate) fn with_handle(&self, tx: TxHandle<T>) -> Self {
        Self {
            tx: Some(tx),
            depth: Arc::clone(&self.depth),
        }
    }

    /// Opens one nesting level; the level closes when the guard drops.
    pub(crate) fn enter(&self) -> DepthGuard {
        self.depth.fetch_add(1, Ordering::SeqCst);
        DepthGuard {
            depth: Arc::clone(&self.depth),
        }
    }
}

impl<T> Default for TxContext<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for TxContext<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            depth: Arc::clone(&self.depth),
        }
    }
}

impl<T> fmt::Debug for TxContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxContext")
            .field("in_transaction", &self.in_transaction())
            .field("depth", &self.depth())
            .finish()
    }
}

/// Decrements the shared depth cell on drop, including during unwinding
/// and when the enclosing future is cancelled.
#[derive(Debug)]
pub(crate) struct DepthGuard {
    depth: Arc<AtomicI32>,
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::pool::{MemoryPool, MemoryTransaction, Pool};

    async fn handle() -> TxHandle<MemoryTransaction> {
        let pool = MemoryPool::new("memory://m");
        let Ok(tx) = pool.begin().await else {
            panic!("begin should succeed");
        };
        TxHandle::new(tx)
    }

    #[test]
    fn root_context_is_empty() {
        let ctx = TxContext::<MemoryTransaction>::new();
        assert!(!ctx.in_transaction());
        assert!(ctx.handle().is_none());
        assert_eq!(ctx.depth(), 0);
    }

    #[tokio::test]
    async fn derived_contexts_share_depth_cell() {
        let root = TxContext::new();
        let derived = root.with_handle(handle().await);
        let sibling = root.clone();

        let guard = derived.enter();
        assert_eq!(root.depth(), 1);
        assert_eq!(sibling.depth(), 1);
        drop(guard);
        assert_eq!(derived.depth(), 0);

        assert!(derived.in_transaction());
        assert!(!root.in_transaction());
    }

    #[tokio::test]
    async fn handle_closes_after_commit() {
        let h = handle().await;
        let copy = h.clone();
        assert!(h.same_as(&copy));

        assert!(h.lock().await.is_ok());
        assert!(copy.commit().await.is_ok());

        assert!(h.is_finished().await);
        assert!(matches!(h.lock().await, Err(DbError::TransactionClosed)));
        assert!(matches!(h.rollback().await, Err(DbError::TransactionClosed)));
    }

    #[tokio::test]
    async fn lock_exposes_transaction() {
        let pool = MemoryPool::new("memory://m");
        let stats = pool.stats();
        let Ok(tx) = pool.begin().await else {
            panic!("begin should succeed");
        };
        let h = TxHandle::new(tx);

        {
            let Ok(mut tx) = h.lock().await else {
                panic!("lock should succeed");
            };
            tx.execute("INSERT INTO users (name) VALUES ('john')");
        }
        assert_eq!(stats.statements().len(), 1);
    }
}
