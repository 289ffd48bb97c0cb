//! [`MemoryPool`] wrapper that records opens and closes per address in a
//! process-wide ledger, so tests can see pools that were opened and
//! discarded inside `open` paths.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, PoisonError};

use super::{MemoryPool, MemoryTransaction, Pool};
use crate::config::PoolConfig;
use crate::error::DbError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lifecycle {
    pub(crate) opens: usize,
    pub(crate) closes: usize,
}

static LEDGER: LazyLock<Mutex<HashMap<String, Lifecycle>>> = LazyLock::new(Mutex::default);

fn record(node: &str, update: impl FnOnce(&mut Lifecycle)) {
    let mut ledger = LEDGER.lock().unwrap_or_else(PoisonError::into_inner);
    update(ledger.entry(node.to_string()).or_default());
}

/// Opens and closes seen for `node`. Tests use addresses unique to them.
pub(crate) fn lifecycle(node: &str) -> Lifecycle {
    LEDGER
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(node)
        .copied()
        .unwrap_or_default()
}

#[derive(Debug)]
pub(crate) struct TrackedPool(MemoryPool);

impl Pool for TrackedPool {
    type Tx = MemoryTransaction;

    async fn open(node: &str, config: &PoolConfig) -> Result<Self, DbError> {
        let pool = MemoryPool::open(node, config).await?;
        record(node, |l| l.opens += 1);
        Ok(Self(pool))
    }

    async fn begin(&self) -> Result<MemoryTransaction, DbError> {
        self.0.begin().await
    }

    async fn close(&self) {
        self.0.close().await;
        record(self.0.label(), |l| l.closes += 1);
    }

    fn label(&self) -> &str {
        self.0.label()
    }
}
