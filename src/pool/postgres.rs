//! PostgreSQL node backed by `sqlx::PgPool`.

use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, PgConnection, PgPool, Postgres};
use tokio::task::AbortHandle;

use super::{Pool, Transaction};
use crate::config::PoolConfig;
use crate::error::DbError;

/// One PostgreSQL node.
///
/// Limits from [`PoolConfig`] map onto `PgPoolOptions`:
///
/// | Config field             | sqlx option                 |
/// |--------------------------|-----------------------------|
/// | `max_conns`              | `max_connections`           |
/// | `min_conns`              | `min_connections`           |
/// | `max_conn_lifetime`      | `max_lifetime`              |
/// | `max_conn_idle_time`     | `idle_timeout`              |
/// | `lazy_connect`           | `connect_lazy_with`         |
/// | `prefer_simple_protocol` | statement cache disabled    |
///
/// `health_check_period` drives a background task that pings one idle
/// connection per period; it is aborted by [`Pool::close`] or when the
/// node is dropped.
#[derive(Debug)]
pub struct PgNode {
    pool: PgPool,
    label: String,
    health_check: Option<AbortHandle>,
}

impl PgNode {
    /// Returns the underlying `sqlx` pool for direct queries.
    #[must_use]
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }
}

impl Pool for PgNode {
    type Tx = PgTransaction;

    async fn open(node: &str, config: &PoolConfig) -> Result<Self, DbError> {
        let mut options = PgConnectOptions::from_str(node).map_err(|source| DbError::Connect {
            node: "<unparseable address>".to_string(),
            source,
        })?;
        let label = describe(&options);

        if config.prefer_simple_protocol {
            options = options
                .statement_cache_capacity(0)
                .options([("standard_conforming_strings", "on")]);
        }

        let pool_options = PgPoolOptions::new()
            .max_connections(config.max_conns)
            .min_connections(config.min_conns)
            .max_lifetime(config.max_conn_lifetime)
            .idle_timeout(config.max_conn_idle_time);

        let pool = if config.lazy_connect {
            pool_options.connect_lazy_with(options)
        } else {
            pool_options
                .connect_with(options)
                .await
                .map_err(|source| DbError::Connect {
                    node: label.clone(),
                    source,
                })?
        };

        let health_check = (!config.health_check_period.is_zero()).then(|| {
            spawn_health_check(pool.clone(), label.clone(), config.health_check_period)
        });

        tracing::info!(node = %label, lazy = config.lazy_connect, "node opened");
        Ok(Self {
            pool,
            label,
            health_check,
        })
    }

    async fn begin(&self) -> Result<PgTransaction, DbError> {
        if self.pool.is_closed() {
            return Err(DbError::PoolClosed);
        }
        let tx = self.pool.begin().await.map_err(DbError::Begin)?;
        Ok(PgTransaction(tx))
    }

    async fn close(&self) {
        if let Some(handle) = &self.health_check {
            handle.abort();
        }
        self.pool.close().await;
        tracing::info!(node = %self.label, "node closed");
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for PgNode {
    fn drop(&mut self) {
        // The task owns a pool clone and would keep it alive.
        if let Some(handle) = &self.health_check {
            handle.abort();
        }
    }
}

/// `host:port/database` without credentials.
fn describe(options: &PgConnectOptions) -> String {
    format!(
        "{}:{}/{}",
        options.get_host(),
        options.get_port(),
        options.get_database().unwrap_or_default()
    )
}

fn spawn_health_check(pool: PgPool, label: String, period: Duration) -> AbortHandle {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if pool.is_closed() {
                break;
            }
            if pool.num_idle() == 0 {
                continue;
            }
            match pool.acquire().await {
                Ok(mut conn) => {
                    if let Err(e) = conn.ping().await {
                        tracing::warn!(node = %label, error = %e, "health check ping failed");
                        conn.close_on_drop();
                    }
                }
                Err(e) => {
                    tracing::warn!(node = %label, error = %e, "health check acquire failed");
                }
            }
        }
    })
    .abort_handle()
}

/// Open transaction on a [`PgNode`].
///
/// Derefs to [`PgConnection`], so statements run through the usual
/// `sqlx` executors:
///
/// ```ignore
/// let mut tx = handle.lock().await?;
/// sqlx::query("UPDATE accounts SET balance = balance - $1 WHERE id = $2")
///     .bind(amount)
///     .bind(id)
///     .execute(tx.as_connection())
///     .await?;
/// ```
///
/// Dropping it without a terminal call rolls the transaction back.
#[derive(Debug)]
pub struct PgTransaction(sqlx::Transaction<'static, Postgres>);

impl PgTransaction {
    /// Returns the connection the transaction runs on.
    pub fn as_connection(&mut self) -> &mut PgConnection {
        &mut self.0
    }
}

impl Deref for PgTransaction {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PgTransaction {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Transaction for PgTransaction {
    async fn commit(self) -> Result<(), DbError> {
        self.0.commit().await.map_err(DbError::Commit)
    }

    async fn rollback(self) -> Result<(), DbError> {
        self.0.rollback().await.map_err(DbError::Rollback)
    }
}
