//! Schema migrations on a pool set's master.
//!
//! Thin wrapper around [`sqlx::migrate::Migrator`]. Scripts live in the
//! directory named by [`MigrationConfig::path`] as reversible pairs
//! (`<version>_<name>.up.sql` / `<version>_<name>.down.sql`).

use sqlx::migrate::{Migrate, Migrator};

use crate::config::MigrationConfig;
use crate::error::DbError;
use crate::pool::{PgNode, Pool};
use crate::registry::PoolSet;

/// Loaded migration scripts.
#[derive(Debug)]
pub struct Migrations {
    migrator: Migrator,
}

impl Migrations {
    /// Reads the scripts from `config.path`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Migrate`] if the directory cannot be read or a
    /// file name does not follow the migration naming scheme.
    pub async fn load(config: &MigrationConfig) -> Result<Self, DbError> {
        let migrator = Migrator::new(config.path.clone()).await?;
        Ok(Self { migrator })
    }

    /// Versions of the forward migrations, ascending.
    #[must_use]
    pub fn versions(&self) -> Vec<i64> {
        let mut versions: Vec<i64> = self
            .migrator
            .iter()
            .filter(|m| !m.migration_type.is_down_migration())
            .map(|m| m.version)
            .collect();
        versions.sort_unstable();
        versions.dedup();
        versions
    }

    /// Applies every pending migration on the master.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Migrate`] if a script fails or the applied
    /// history does not match the scripts on disk.
    pub async fn up(&self, pools: &PoolSet<PgNode>) -> Result<(), DbError> {
        let master = pools.master();
        self.migrator.run(master.inner()).await?;
        tracing::info!(node = %master.label(), "migrations applied");
        Ok(())
    }

    /// Reverts the `steps` most recently applied migrations on the master.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connect`] if no connection can be acquired and
    /// [`DbError::Migrate`] if a down script fails.
    pub async fn down(&self, pools: &PoolSet<PgNode>, steps: usize) -> Result<(), DbError> {
        if steps == 0 {
            return Ok(());
        }
        let master = pools.master();

        let applied = {
            let mut conn = master
                .inner()
                .acquire()
                .await
                .map_err(|source| DbError::Connect {
                    node: master.label().to_string(),
                    source,
                })?;
            conn.ensure_migrations_table().await?;
            conn.list_applied_migrations().await?
        };
        let mut versions: Vec<i64> = applied.into_iter().map(|m| m.version).collect();
        versions.sort_unstable();

        let target = revert_target(&versions, steps);
        self.migrator.undo(master.inner(), target).await?;
        tracing::info!(node = %master.label(), steps, target, "migrations reverted");
        Ok(())
    }
}

/// Highest applied version that survives reverting `steps` migrations,
/// or `0` when everything is reverted.
fn revert_target(applied: &[i64], steps: usize) -> i64 {
    applied
        .len()
        .checked_sub(steps.saturating_add(1))
        .and_then(|keep| applied.get(keep))
        .copied()
        .unwrap_or(0)
}
