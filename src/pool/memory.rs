//! In-process pool double.
//!
//! [`MemoryPool`] never touches the network. Every transaction it hands
//! out reports into a shared [`MemoryStats`], which tests inspect to
//! assert exactly how many begins, commits and rollbacks happened. Each
//! operation can be switched to fail on demand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{Pool, Transaction};
use crate::config::PoolConfig;
use crate::error::DbError;

/// Address scheme accepted by [`MemoryPool::open`].
pub const MEMORY_SCHEME: &str = "memory://";

/// Shared counters and failure switches for a [`MemoryPool`].
#[derive(Debug, Default)]
pub struct MemoryStats {
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    statements: Mutex<Vec<String>>,
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
}

impl MemoryStats {
    /// Number of successful `begin` calls.
    #[must_use]
    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    /// Number of `commit` calls, including rejected ones.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of `rollback` calls, including rejected ones.
    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Statements executed through any transaction, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Makes subsequent `begin` calls fail with a pool timeout.
    pub fn set_fail_begin(&self, fail: bool) {
        self.fail_begin.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `commit` calls fail.
    pub fn set_fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `rollback` calls fail.
    pub fn set_fail_rollback(&self, fail: bool) {
        self.fail_rollback.store(fail, Ordering::SeqCst);
    }
}

/// Deterministic [`Pool`] for tests.
#[derive(Debug)]
pub struct MemoryPool {
    label: String,
    stats: Arc<MemoryStats>,
    closed: AtomicBool,
}

impl MemoryPool {
    /// Creates an open pool with fresh counters.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            stats: Arc::new(MemoryStats::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the counters shared by this pool and its transactions.
    #[must_use]
    pub fn stats(&self) -> Arc<MemoryStats> {
        Arc::clone(&self.stats)
    }

    /// Returns `true` once [`Pool::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Pool for MemoryPool {
    type Tx = MemoryTransaction;

    async fn open(node: &str, _config: &PoolConfig) -> Result<Self, DbError> {
        match node.strip_prefix(MEMORY_SCHEME) {
            Some(name) if !name.is_empty() => Ok(Self::new(node)),
            _ => Err(DbError::Connect {
                node: node.to_string(),
                source: sqlx::Error::Configuration(
                    format!("expected a {MEMORY_SCHEME} address").into(),
                ),
            }),
        }
    }

    async fn begin(&self) -> Result<MemoryTransaction, DbError> {
        if self.is_closed() {
            return Err(DbError::PoolClosed);
        }
        if self.stats.fail_begin.load(Ordering::SeqCst) {
            return Err(DbError::Begin(sqlx::Error::PoolTimedOut));
        }
        self.stats.begins.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryTransaction {
            stats: Arc::clone(&self.stats),
        })
    }

    async fn close(&self) {
        // A real pool awaits connection shutdown here.
        tokio::task::yield_now().await;
        self.closed.store(true, Ordering::SeqCst);
    }

    fn label(&self) -> &str {
        &self.label
    }
}

/// Transaction handed out by [`MemoryPool`].
#[derive(Debug)]
pub struct MemoryTransaction {
    stats: Arc<MemoryStats>,
}

impl MemoryTransaction {
    /// Records a statement as executed inside this transaction.
    pub fn execute(&mut self, sql: &str) {
        self.stats
            .statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sql.to_string());
    }
}

impl Transaction for MemoryTransaction {
    async fn commit(self) -> Result<(), DbError> {
        self.stats.commits.fetch_add(1, Ordering::SeqCst);
        if self.stats.fail_commit.load(Ordering::SeqCst) {
            return Err(DbError::Commit(sqlx::Error::Protocol(
                "commit rejected".to_string(),
            )));
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), DbError> {
        self.stats.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.stats.fail_rollback.load(Ordering::SeqCst) {
            return Err(DbError::Rollback(sqlx::Error::Protocol(
                "rollback rejected".to_string(),
            )));
        }
        Ok(())
    }
}
