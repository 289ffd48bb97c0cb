//! Transaction manager bound to a pool set's master.

use std::future::Future;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::Arc;

use futures_util::FutureExt;

use super::context::{TxContext, TxHandle};
use crate::error::DbError;
use crate::pool::{PgNode, Pool};
use crate::registry::{PoolSet, Registry};

/// Runs units of work inside transactions on the master of one
/// [`PoolSet`].
///
/// # Outcome rules
///
/// For the scope that began the transaction:
///
/// - work returns `Ok` → commit; a commit failure becomes the result.
/// - work returns `Err` → rollback; the original error is returned and
///   a rollback failure is only logged.
/// - work panics → rollback, then the panic resumes unchanged.
///
/// Scopes that joined an existing transaction never commit or roll back.
#[derive(Debug)]
pub struct TxManager<P = PgNode> {
    pools: Arc<PoolSet<P>>,
}

impl<P: Pool> Clone for TxManager<P> {
    fn clone(&self) -> Self {
        Self {
            pools: Arc::clone(&self.pools),
        }
    }
}

impl<P: Pool> TxManager<P> {
    /// Creates a manager over `pools`. Transactions always run on
    /// [`PoolSet::master`].
    #[must_use]
    pub fn new(pools: Arc<PoolSet<P>>) -> Self {
        Self { pools }
    }

    /// Creates a manager over the registry's default pool set.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::UnknownPool`] if the registry has no default set.
    pub async fn from_registry(registry: &Registry<P>) -> Result<Self, DbError> {
        Ok(Self::new(registry.pools().await?))
    }

    /// Returns the pool set this manager runs on.
    #[must_use]
    pub fn pools(&self) -> &Arc<PoolSet<P>> {
        &self.pools
    }

    /// Begins a new transaction and returns a context carrying it.
    ///
    /// `ctx` itself is left untouched, also on failure.
    ///
    /// # Errors
    ///
    /// Propagates the master pool's begin failure.
    pub async fn begin(&self, ctx: &TxContext<P::Tx>) -> Result<TxContext<P::Tx>, DbError> {
        let (ctx, _) = self.start(ctx).await?;
        Ok(ctx)
    }

    /// Commits the transaction carried by `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoTransaction`] if `ctx` carries no handle,
    /// [`DbError::TransactionClosed`] if it was already finished, or the
    /// commit failure.
    pub async fn commit(&self, ctx: &TxContext<P::Tx>) -> Result<(), DbError> {
        let handle = ctx.handle().ok_or(DbError::NoTransaction)?;
        handle.commit().await?;
        tracing::debug!(node = %self.pools.master().label(), "transaction committed");
        Ok(())
    }

    /// Rolls back the transaction carried by `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoTransaction`] if `ctx` carries no handle,
    /// [`DbError::TransactionClosed`] if it was already finished, or the
    /// rollback failure.
    pub async fn rollback(&self, ctx: &TxContext<P::Tx>) -> Result<(), DbError> {
        let handle = ctx.handle().ok_or(DbError::NoTransaction)?;
        handle.rollback().await?;
        tracing::debug!(node = %self.pools.master().label(), "transaction rolled back");
        Ok(())
    }

    /// Runs `work` inside a transaction.
    ///
    /// If `ctx` already carries a transaction, `work` runs on it directly
    /// and the enclosing scope stays responsible for the outcome.
    /// Otherwise a transaction is begun and finished according to the
    /// outcome rules on [`TxManager`].
    ///
    /// # Errors
    ///
    /// Returns the error of `work`, or a begin/commit failure converted
    /// into `E`.
    pub async fn with_tx<F, Fut, R, E>(&self, ctx: &TxContext<P::Tx>, work: F) -> Result<R, E>
    where
        F: FnOnce(TxContext<P::Tx>, TxHandle<P::Tx>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<DbError>,
    {
        if let Some(handle) = ctx.handle() {
            return work(ctx.clone(), handle.clone()).await;
        }

        let (ctx, handle) = self.start(ctx).await?;
        let outcome = AssertUnwindSafe(work(ctx.clone(), handle))
            .catch_unwind()
            .await;
        self.finish(&ctx, outcome).await
    }

    /// Runs `work` inside a transaction that any depth of nested calls
    /// shares.
    ///
    /// Each call opens one depth level on the context's counter. Only the
    /// call that found no transaction begins one, and only that call
    /// commits or rolls back, after its level has been closed. Nested
    /// calls return their errors and resume their panics untouched, so a
    /// failure anywhere surfaces in every enclosing scope while the
    /// physical rollback happens once.
    ///
    /// # Errors
    ///
    /// Returns the error of `work`, or a begin/commit failure converted
    /// into `E`.
    pub async fn with_nested_tx<F, Fut, R, E>(
        &self,
        ctx: &TxContext<P::Tx>,
        work: F,
    ) -> Result<R, E>
    where
        F: FnOnce(TxContext<P::Tx>, TxHandle<P::Tx>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<DbError>,
    {
        let level = ctx.enter();
        let (ctx, handle, owner) = match ctx.handle() {
            Some(handle) => (ctx.clone(), handle.clone(), false),
            None => {
                let (ctx, handle) = self.start(ctx).await?;
                (ctx, handle, true)
            }
        };
        tracing::debug!(depth = ctx.depth(), owner, "entering nested transaction scope");

        let outcome = AssertUnwindSafe(work(ctx.clone(), handle))
            .catch_unwind()
            .await;
        drop(level);

        if owner {
            return self.finish(&ctx, outcome).await;
        }
        match outcome {
            Ok(result) => result,
            Err(panic) => resume_unwind(panic),
        }
    }

    async fn start(
        &self,
        ctx: &TxContext<P::Tx>,
    ) -> Result<(TxContext<P::Tx>, TxHandle<P::Tx>), DbError> {
        let master = self.pools.master();
        let tx = master.begin().await?;
        let handle = TxHandle::new(tx);
        tracing::debug!(node = %master.label(), "transaction started");
        Ok((ctx.with_handle(handle.clone()), handle))
    }

    /// Applies the outcome rules for the scope that owns the transaction.
    async fn finish<R, E>(
        &self,
        ctx: &TxContext<P::Tx>,
        outcome: std::thread::Result<Result<R, E>>,
    ) -> Result<R, E>
    where
        E: From<DbError>,
    {
        match outcome {
            Err(panic) => {
                if let Err(e) = self.rollback(ctx).await {
                    tracing::warn!(error = %e, "rollback after panic failed");
                }
                resume_unwind(panic)
            }
            Ok(Err(err)) => {
                if let Err(e) = self.rollback(ctx).await {
                    tracing::warn!(error = %e, "rollback after failed work failed");
                }
                Err(err)
            }
            Ok(Ok(value)) => {
                self.commit(ctx).await?;
                Ok(value)
            }
        }
    }
}
