//! Master/replica routing over the nodes of one logical database.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::PoolConfig;
use crate::error::DbError;
use crate::pool::Pool;

/// One master plus zero or more replicas, fixed at construction.
///
/// # Routing
///
/// - [`PoolSet::master`] always returns the first configured node.
/// - [`PoolSet::slave`] round-robins over the replicas with a single
///   atomic increment per call. With no replicas it returns the master.
#[derive(Debug)]
pub struct PoolSet<P> {
    master: P,
    replicas: Vec<P>,
    counter: AtomicU64,
}

impl<P: Pool> PoolSet<P> {
    /// Builds a set from already opened pools.
    #[must_use]
    pub fn from_pools(master: P, replicas: Vec<P>) -> Self {
        Self {
            master,
            replicas,
            counter: AtomicU64::new(0),
        }
    }

    /// Builds a single-node set.
    #[must_use]
    pub fn single(master: P) -> Self {
        Self::from_pools(master, Vec::new())
    }

    /// Opens one pool per configured node, applying the same limits to
    /// each. Zero-valued limits fall back to their defaults.
    ///
    /// Nodes opened before a failing node are closed again.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoNodes`] for an empty node list, otherwise the
    /// error of the first node that fails to open.
    pub async fn open(config: &PoolConfig) -> Result<Self, DbError> {
        let config = config.clone().with_defaults();
        let mut nodes = config.nodes.iter();
        let Some(first) = nodes.next() else {
            return Err(DbError::NoNodes);
        };

        let master = P::open(first, &config).await?;
        let mut replicas = Vec::with_capacity(config.nodes.len().saturating_sub(1));
        for node in nodes {
            match P::open(node, &config).await {
                Ok(pool) => replicas.push(pool),
                Err(e) => {
                    for pool in std::iter::once(&master).chain(&replicas) {
                        pool.close().await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self::from_pools(master, replicas))
    }

    /// Returns the master pool.
    #[must_use]
    pub fn master(&self) -> &P {
        &self.master
    }

    /// Returns the next replica in round-robin order, or the master when
    /// the set has no replicas.
    #[must_use]
    pub fn slave(&self) -> &P {
        if self.replicas.is_empty() {
            return &self.master;
        }
        self.replicas
            .get(self.next_replica())
            .unwrap_or(&self.master)
    }

    /// Offset into `replicas` of the next replica to hand out.
    fn next_replica(&self) -> usize {
        let n = u64::try_from(self.replicas.len()).unwrap_or(1);
        // fetch_add + 1 keeps the sequence identical to incrementing first.
        let tick = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        usize::try_from(tick % n).unwrap_or(0)
    }

    /// Total number of nodes, master included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.replicas.len() + 1
    }

    /// Always `false`: a set holds at least its master.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterates over all nodes, master first.
    pub fn nodes(&self) -> impl Iterator<Item = &P> {
        std::iter::once(&self.master).chain(&self.replicas)
    }

    /// Closes every node in the set.
    pub async fn close(&self) {
        for pool in self.nodes() {
            pool.close().await;
        }
    }
}
