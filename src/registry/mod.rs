//! Named pool sets with a shared open/close lifecycle.
//!
//! [`Registry`] stores every [`PoolSet`] behind one
//! [`tokio::sync::Mutex`]. Lookups and teardown take the same lock, so a
//! lookup either completes before [`Registry::close`] starts or observes
//! the emptied registry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::{Configs, PoolConfig};
use crate::error::DbError;
use crate::pool::{PgNode, Pool};

pub mod pool_set;

pub use pool_set::PoolSet;

/// Conventional name of the primary pool set.
pub const DEFAULT_POOL: &str = "default";

/// Named collection of [`PoolSet`]s.
#[derive(Debug)]
pub struct Registry<P = PgNode> {
    pools: Mutex<HashMap<String, Arc<PoolSet<P>>>>,
}

impl<P: Pool> Registry<P> {
    /// Opens every configured pool set.
    ///
    /// Construction is all-or-nothing: if any set fails to open, the sets
    /// opened so far are closed and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first [`DbError`] produced while opening a set.
    pub async fn open(configs: Configs) -> Result<Self, DbError> {
        let mut pools = HashMap::with_capacity(configs.len());

        for (name, config) in configs {
            match PoolSet::<P>::open(&config).await {
                Ok(set) => {
                    tracing::info!(name = %name, nodes = set.len(), "pool set opened");
                    pools.insert(name, Arc::new(set));
                }
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "pool set failed to open");
                    for set in pools.values() {
                        set.close().await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self {
            pools: Mutex::new(pools),
        })
    }

    /// Starts a [`RegistryBuilder`].
    #[must_use]
    pub fn builder() -> RegistryBuilder<P> {
        RegistryBuilder::new()
    }

    /// Returns the pool set registered as [`DEFAULT_POOL`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::UnknownPool`] if there is no default set.
    pub async fn pools(&self) -> Result<Arc<PoolSet<P>>, DbError> {
        self.get_by_name(DEFAULT_POOL).await
    }

    /// Returns the pool set registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::UnknownPool`] if no set has that name.
    pub async fn get_by_name(&self, name: &str) -> Result<Arc<PoolSet<P>>, DbError> {
        let map = self.pools.lock().await;
        map.get(name)
            .cloned()
            .ok_or_else(|| DbError::UnknownPool(name.to_string()))
    }

    /// Registered pool-set names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let map = self.pools.lock().await;
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Number of registered pool sets.
    pub async fn len(&self) -> usize {
        self.pools.lock().await.len()
    }

    /// Returns `true` if no pool sets are registered.
    pub async fn is_empty(&self) -> bool {
        self.pools.lock().await.is_empty()
    }

    /// Closes every pool set and empties the registry.
    ///
    /// The lock is held for the whole teardown. Closing an already
    /// emptied registry does nothing.
    pub async fn close(&self) {
        let mut map = self.pools.lock().await;
        for (name, set) in map.drain() {
            set.close().await;
            tracing::info!(name = %name, "pool set closed");
        }
    }
}

/// Accumulates named configurations before opening a [`Registry`].
///
/// Adding a name twice merges the second configuration onto the first
/// (see [`PoolConfig::merge`]).
#[derive(Debug)]
pub struct RegistryBuilder<P = PgNode> {
    configs: Configs,
    _pool: std::marker::PhantomData<fn() -> P>,
}

impl<P: Pool> RegistryBuilder<P> {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            configs: Configs::new(),
            _pool: std::marker::PhantomData,
        }
    }

    /// Adds or merges the configuration for `name`.
    #[must_use]
    pub fn with_config(mut self, name: impl Into<String>, config: PoolConfig) -> Self {
        let name = name.into();
        let config = match self.configs.remove(&name) {
            Some(existing) => existing.merge(config),
            None => config.with_defaults(),
        };
        self.configs.insert(name, config);
        self
    }

    /// Adds every entry of `configs`, merging repeated names.
    #[must_use]
    pub fn with_configs(self, configs: Configs) -> Self {
        configs
            .into_iter()
            .fold(self, |builder, (name, config)| builder.with_config(name, config))
    }

    /// Returns the accumulated configurations.
    #[must_use]
    pub fn configs(&self) -> &Configs {
        &self.configs
    }

    /// Opens the registry. See [`Registry::open`].
    ///
    /// # Errors
    ///
    /// Returns the first [`DbError`] produced while opening a set.
    pub async fn open(self) -> Result<Registry<P>, DbError> {
        Registry::open(self.configs).await
    }
}

impl<P: Pool> Default for RegistryBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::pool::MemoryPool;
    use crate::pool::tracked::{Lifecycle, TrackedPool, lifecycle};

    fn configs(entries: Vec<(&str, Vec<&str>)>) -> Configs {
        entries
            .into_iter()
            .map(|(name, nodes)| (name.to_string(), PoolConfig::with_nodes(nodes)))
            .collect()
    }

    #[tokio::test]
    async fn empty_registry_reports_unknown_pool() {
        let Ok(registry) = Registry::<MemoryPool>::open(Configs::new()).await else {
            panic!("empty registry should open");
        };
        let result = registry.get_by_name("nonexistent").await;
        let Err(DbError::UnknownPool(name)) = result else {
            panic!("expected unknown pool");
        };
        assert_eq!(name, "nonexistent");
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn lookup_by_name_and_default() {
        let cfg = configs(vec![
            ("default", vec!["memory://m", "memory://r1"]),
            ("reports", vec!["memory://reports"]),
        ]);
        let Ok(registry) = Registry::<MemoryPool>::open(cfg).await else {
            panic!("registry should open");
        };

        let Ok(default) = registry.pools().await else {
            panic!("default pool set");
        };
        assert_eq!(default.master().label(), "memory://m");
        assert_eq!(default.slave().label(), "memory://r1");

        let Ok(reports) = registry.get_by_name("reports").await else {
            panic!("reports pool set");
        };
        assert_eq!(reports.len(), 1);
        assert_eq!(registry.names().await, vec!["default", "reports"]);
        assert!(matches!(
            registry.get_by_name("missing").await,
            Err(DbError::UnknownPool(_))
        ));
    }

    #[tokio::test]
    async fn invalid_entry_fails_whole_registry() {
        let cfg = configs(vec![
            ("default", vec!["memory://m"]),
            ("broken", vec!["memory://ok", "postgres://not-memory"]),
        ]);
        let result = Registry::<MemoryPool>::open(cfg).await;
        assert!(matches!(result, Err(DbError::Connect { .. })));
    }

    #[tokio::test]
    async fn failed_open_closes_sets_already_opened() {
        let default = ["memory://partial-registry/m", "memory://partial-registry/r1"];
        let opened = "memory://partial-registry/ok";
        let cfg = configs(vec![
            ("default", default.to_vec()),
            ("broken", vec![opened, "postgres://partial-registry/not-memory"]),
        ]);

        let result = Registry::<TrackedPool>::open(cfg).await;
        assert!(matches!(result, Err(DbError::Connect { .. })));

        // `broken` always gets as far as its master.
        assert_eq!(lifecycle(opened), Lifecycle { opens: 1, closes: 1 });
        // `default` is only opened when it comes first in map order, and
        // must then be closed again.
        for node in default {
            let seen = lifecycle(node);
            assert_eq!(seen.opens, seen.closes, "{node} left open");
        }
    }

    #[tokio::test]
    async fn entry_without_nodes_fails_whole_registry() {
        let cfg = configs(vec![("default", vec!["memory://m"]), ("empty", vec![])]);
        let result = Registry::<MemoryPool>::open(cfg).await;
        assert!(matches!(result, Err(DbError::NoNodes)));
    }

    #[tokio::test]
    async fn close_empties_and_closes() {
        let cfg = configs(vec![("default", vec!["memory://m", "memory://r1"])]);
        let Ok(registry) = Registry::<MemoryPool>::open(cfg).await else {
            panic!("registry should open");
        };
        let Ok(set) = registry.pools().await else {
            panic!("default pool set");
        };

        registry.close().await;
        assert!(registry.is_empty().await);
        assert_eq!(registry.len().await, 0);
        assert!(set.nodes().all(MemoryPool::is_closed));

        // Second close is a no-op.
        registry.close().await;
        assert!(matches!(
            registry.pools().await,
            Err(DbError::UnknownPool(_))
        ));
    }

    #[tokio::test]
    async fn lookups_racing_close_never_see_half_closed_sets() {
        let cfg = configs(vec![(
            "default",
            vec!["memory://m", "memory://r1", "memory://r2"],
        )]);
        let Ok(registry) = Registry::<MemoryPool>::open(cfg).await else {
            panic!("registry should open");
        };
        let registry = Arc::new(registry);

        let lookup = |registry: Arc<Registry<MemoryPool>>| {
            tokio::spawn(async move {
                match registry.pools().await {
                    Ok(set) => {
                        let closed = set.nodes().filter(|p| p.is_closed()).count();
                        assert!(closed == 0 || closed == set.len(), "half-closed set");
                        Some(set)
                    }
                    Err(DbError::UnknownPool(_)) => None,
                    Err(e) => panic!("unexpected lookup error: {e}"),
                }
            })
        };

        let mut before = Vec::new();
        for _ in 0..8 {
            let Ok(found) = lookup(Arc::clone(&registry)).await else {
                panic!("lookup task panicked");
            };
            let Some(set) = found else {
                panic!("lookup before close should find the set");
            };
            before.push(set);
        }

        // Spawned but not yet polled: node closes yield, so these run
        // while teardown holds the lock and must wait for it to finish.
        let during: Vec<_> = (0..8).map(|_| lookup(Arc::clone(&registry))).collect();
        registry.close().await;

        for task in during {
            let Ok(found) = task.await else {
                panic!("lookup task panicked");
            };
            assert!(found.is_none(), "lookup during close saw a live set");
        }
        for set in before {
            assert!(set.nodes().all(MemoryPool::is_closed));
        }
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn builder_merges_repeated_names() {
        let builder = Registry::<MemoryPool>::builder()
            .with_config(
                "default",
                PoolConfig {
                    max_conns: 20,
                    ..PoolConfig::with_nodes(["memory://m"])
                },
            )
            .with_config(
                "default",
                PoolConfig {
                    nodes: vec!["memory://m2".to_string(), "memory://r1".to_string()],
                    max_conns: 0,
                    ..PoolConfig::default()
                },
            );

        let Some(cfg) = builder.configs().get("default") else {
            panic!("default config present");
        };
        assert_eq!(cfg.max_conns, 20);
        assert_eq!(cfg.nodes.len(), 2);

        let Ok(registry) = builder.open().await else {
            panic!("registry should open");
        };
        let Ok(set) = registry.pools().await else {
            panic!("default pool set");
        };
        assert_eq!(set.master().label(), "memory://m2");
    }
}
