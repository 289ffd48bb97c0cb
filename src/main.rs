//! pgsql-registry health probe.
//!
//! Opens every configured pool set, optionally applies migrations, runs
//! `SELECT 1` in a transaction on the default master and in a rolled-back
//! read transaction on one replica, then closes the registry.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use pgsql_registry::config::{self, MigrationConfig};
use pgsql_registry::migrate::Migrations;
use pgsql_registry::{
    DbError, PgNode, Pool, PoolSet, Registry, Transaction, TxContext, TxManager,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let configs = config::configs_from_env()?;
    tracing::info!(pool_sets = configs.len(), "opening registry");

    let registry = Registry::<PgNode>::open(configs).await?;
    let result = probe(&registry).await;
    registry.close().await;

    result?;
    tracing::info!("probe finished");
    Ok(())
}

async fn probe(registry: &Registry<PgNode>) -> Result<(), DbError> {
    let pools = registry.pools().await?;

    if let Some(migration_config) = MigrationConfig::from_env() {
        let migrations = Migrations::load(&migration_config).await?;
        tracing::info!(count = migrations.versions().len(), "applying migrations");
        migrations.up(&pools).await?;
    }

    let manager = TxManager::new(Arc::clone(&pools));
    manager
        .with_tx(&TxContext::new(), |_ctx, tx| async move {
            let mut tx = tx.lock().await?;
            sqlx::query("SELECT 1").execute(tx.as_connection()).await?;
            Ok::<_, DbError>(())
        })
        .await?;
    tracing::info!(node = %pools.master().label(), "master reachable");

    probe_replica(&pools).await?;

    for name in registry.names().await {
        let set = registry.get_by_name(&name).await?;
        tracing::info!(name = %name, nodes = set.len(), "pool set ready");
    }
    Ok(())
}

async fn probe_replica(pools: &PoolSet<PgNode>) -> Result<(), DbError> {
    let replica = pools.slave();
    let mut tx = replica.begin().await?;
    sqlx::query("SELECT 1").execute(tx.as_connection()).await?;
    tx.rollback().await?;
    tracing::info!(node = %replica.label(), "replica reachable");
    Ok(())
}
