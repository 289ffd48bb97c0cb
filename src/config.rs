//! Pool configuration.
//!
//! A [`PoolConfig`] describes one pool set: the node addresses (master
//! first, replicas after) and the connection limits applied uniformly to
//! every node. [`Configs`] maps pool-set names to their configuration.
//!
//! Configurations come from JSON ([`configs_from_json`]) or from
//! environment variables ([`configs_from_env`], 12-factor style with an
//! optional `.env` file via `dotenvy`):
//!
//! | Variable                              | Default  |
//! |---------------------------------------|----------|
//! | `PGSQL_POOLS`                         | `default` from `DATABASE_URL` |
//! | `PGSQL_<NAME>_NODES`                  | required |
//! | `PGSQL_<NAME>_MAX_CONNS`              | `4`      |
//! | `PGSQL_<NAME>_MIN_CONNS`              | `0`      |
//! | `PGSQL_<NAME>_MAX_CONN_LIFETIME_SECS` | `3600`   |
//! | `PGSQL_<NAME>_MAX_CONN_IDLE_TIME_SECS`| `1800`   |
//! | `PGSQL_<NAME>_HEALTH_CHECK_PERIOD_SECS` | `60`   |
//! | `PGSQL_<NAME>_LAZY_CONNECT`           | `false`  |
//! | `PGSQL_<NAME>_PREFER_SIMPLE_PROTOCOL` | `false`  |
//! | `PGSQL_MIGRATIONS_PATH`               | `migrations` |
//!
//! When `PGSQL_POOLS` is unset, `DATABASE_URL` becomes a single-node
//! `default` pool set.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DbError;
use crate::registry::DEFAULT_POOL;

const DEFAULT_MAX_CONNS: u32 = 4;
const DEFAULT_MIN_CONNS: u32 = 0;
const DEFAULT_MAX_CONN_LIFETIME: Duration = Duration::from_secs(60 * 60);
const DEFAULT_MAX_CONN_IDLE_TIME: Duration = Duration::from_secs(30 * 60);
const DEFAULT_HEALTH_CHECK_PERIOD: Duration = Duration::from_secs(60);
const DEFAULT_MIGRATIONS_PATH: &str = "migrations";

/// Registry configuration: pool-set name to pool configuration.
pub type Configs = HashMap<String, PoolConfig>;

/// Configuration of a single pool set.
///
/// Durations are (de)serialized as whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Node connection strings. The first entry is the master.
    pub nodes: Vec<String>,

    /// Maximum number of connections per node.
    pub max_conns: u32,

    /// Minimum number of connections kept open per node.
    pub min_conns: u32,

    /// Maximum lifetime of a connection before it is recycled.
    #[serde(with = "duration_secs")]
    pub max_conn_lifetime: Duration,

    /// Maximum time a connection may sit idle before it is closed.
    #[serde(with = "duration_secs")]
    pub max_conn_idle_time: Duration,

    /// Interval between background health checks of idle connections.
    #[serde(with = "duration_secs")]
    pub health_check_period: Duration,

    /// Open nodes without establishing a connection up front.
    #[serde(alias = "lazy_conn")]
    pub lazy_connect: bool,

    /// Avoid server-side prepared statements.
    pub prefer_simple_protocol: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            max_conns: DEFAULT_MAX_CONNS,
            min_conns: DEFAULT_MIN_CONNS,
            max_conn_lifetime: DEFAULT_MAX_CONN_LIFETIME,
            max_conn_idle_time: DEFAULT_MAX_CONN_IDLE_TIME,
            health_check_period: DEFAULT_HEALTH_CHECK_PERIOD,
            lazy_connect: false,
            prefer_simple_protocol: false,
        }
    }
}

impl PoolConfig {
    /// Creates a configuration for the given nodes with default limits.
    #[must_use]
    pub fn with_nodes<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Replaces every zero-valued limit with its documented default.
    pub fn apply_defaults(&mut self) {
        if self.max_conns == 0 {
            self.max_conns = DEFAULT_MAX_CONNS;
        }
        if self.min_conns == 0 {
            self.min_conns = DEFAULT_MIN_CONNS;
        }
        if self.max_conn_lifetime.is_zero() {
            self.max_conn_lifetime = DEFAULT_MAX_CONN_LIFETIME;
        }
        if self.max_conn_idle_time.is_zero() {
            self.max_conn_idle_time = DEFAULT_MAX_CONN_IDLE_TIME;
        }
        if self.health_check_period.is_zero() {
            self.health_check_period = DEFAULT_HEALTH_CHECK_PERIOD;
        }
    }

    /// Returns a copy with defaults applied. See [`Self::apply_defaults`].
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.apply_defaults();
        self
    }

    /// Overlays `other` onto `self`.
    ///
    /// Non-zero limits and a non-empty node list in `other` win. The two
    /// flags are always taken from `other`.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        if other.max_conns != 0 {
            self.max_conns = other.max_conns;
        }
        if other.min_conns != 0 {
            self.min_conns = other.min_conns;
        }
        if !other.max_conn_lifetime.is_zero() {
            self.max_conn_lifetime = other.max_conn_lifetime;
        }
        if !other.max_conn_idle_time.is_zero() {
            self.max_conn_idle_time = other.max_conn_idle_time;
        }
        if !other.health_check_period.is_zero() {
            self.health_check_period = other.health_check_period;
        }
        if !other.nodes.is_empty() {
            self.nodes = other.nodes;
        }
        self.lazy_connect = other.lazy_connect;
        self.prefer_simple_protocol = other.prefer_simple_protocol;
        self
    }
}

/// Location of the migration scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Directory holding `<version>_<name>.up.sql` / `.down.sql` files.
    pub path: PathBuf,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_MIGRATIONS_PATH),
        }
    }
}

impl MigrationConfig {
    /// Reads `PGSQL_MIGRATIONS_PATH`, returning `None` when it is unset.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        dotenvy::dotenv().ok();
        std::env::var("PGSQL_MIGRATIONS_PATH")
            .ok()
            .filter(|path| !path.is_empty())
            .map(|path| Self {
                path: PathBuf::from(path),
            })
    }
}

/// Parses a JSON object of pool-set name to [`PoolConfig`].
///
/// # Errors
///
/// Returns [`DbError::Config`] if the document is not valid JSON or does
/// not match the expected shape.
pub fn configs_from_json(json: &str) -> Result<Configs, DbError> {
    let configs: Configs =
        serde_json::from_str(json).map_err(|e| DbError::Config(e.to_string()))?;
    Ok(configs
        .into_iter()
        .map(|(name, config)| (name, config.with_defaults()))
        .collect())
}

/// Loads pool configurations from the process environment.
///
/// Calls `dotenvy::dotenv().ok()` first so a `.env` file is honoured.
///
/// # Errors
///
/// Returns [`DbError::MissingConfig`] if a listed pool set has no
/// `PGSQL_<NAME>_NODES` variable.
pub fn configs_from_env() -> Result<Configs, DbError> {
    dotenvy::dotenv().ok();
    configs_from_lookup(|key| std::env::var(key).ok())
}

/// Loads pool configurations through an arbitrary variable lookup.
///
/// # Errors
///
/// Returns [`DbError::MissingConfig`] if a listed pool set has no
/// `PGSQL_<NAME>_NODES` variable.
pub fn configs_from_lookup<F>(lookup: F) -> Result<Configs, DbError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(names) = lookup("PGSQL_POOLS") else {
        let mut configs = Configs::new();
        if let Some(url) = lookup("DATABASE_URL").filter(|url| !url.is_empty()) {
            configs.insert(DEFAULT_POOL.to_string(), PoolConfig::with_nodes([url]));
        }
        return Ok(configs);
    };

    let mut configs = Configs::new();
    for name in split_list(&names) {
        if configs.contains_key(&name) {
            continue;
        }

        let prefix = format!("PGSQL_{}", env_segment(&name));
        let nodes_key = format!("{prefix}_NODES");
        let nodes = lookup(&nodes_key)
            .map(|value| split_list(&value))
            .filter(|nodes| !nodes.is_empty())
            .ok_or_else(|| DbError::MissingConfig(nodes_key.clone()))?;

        let secs = |suffix: &str, default: Duration| {
            Duration::from_secs(parse_var(
                &lookup,
                &format!("{prefix}_{suffix}"),
                default.as_secs(),
            ))
        };

        let config = PoolConfig {
            nodes,
            max_conns: parse_var(&lookup, &format!("{prefix}_MAX_CONNS"), DEFAULT_MAX_CONNS),
            min_conns: parse_var(&lookup, &format!("{prefix}_MIN_CONNS"), DEFAULT_MIN_CONNS),
            max_conn_lifetime: secs("MAX_CONN_LIFETIME_SECS", DEFAULT_MAX_CONN_LIFETIME),
            max_conn_idle_time: secs("MAX_CONN_IDLE_TIME_SECS", DEFAULT_MAX_CONN_IDLE_TIME),
            health_check_period: secs("HEALTH_CHECK_PERIOD_SECS", DEFAULT_HEALTH_CHECK_PERIOD),
            lazy_connect: parse_bool(&lookup, &format!("{prefix}_LAZY_CONNECT"), false),
            prefer_simple_protocol: parse_bool(
                &lookup,
                &format!("{prefix}_PREFER_SIMPLE_PROTOCOL"),
                false,
            ),
        };

        configs.insert(name, config.with_defaults());
    }

    Ok(configs)
}

/// Splits a comma-separated list, trimming blanks.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Maps a pool-set name onto an environment variable segment.
fn env_segment(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Parses a variable as `T`, returning `default` on missing or invalid
/// values.
fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses a variable as a boolean. Accepts `true`/`1` and `false`/`0`
/// (case-insensitive). Returns `default` otherwise.
fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => true,
        Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => false,
        _ => default,
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
