use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};

pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_RANGE_PREFIX: &str = "range_part";
pub const DEFAULT_ROUND_ROBIN_PREFIX: &str = "rrobin_part";

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for `PgRecordStore`. Every partitioning operation holds a single
/// connection from start to commit, cursor row included, so one connection is enough for a
/// sequential loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub db_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long an operation waits for a free connection before failing.
    pub acquire_timeout: Duration,
    /// `None` keeps idle connections open.
    pub idle_timeout: Option<Duration>,
}

impl PoolConfig {
    pub fn new(db_url: &str) -> Self {
        Self {
            db_url: db_url.to_owned(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: 1,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }

    pub fn options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections.min(self.max_connections))
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(self.idle_timeout)
    }

    pub async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        self.options().connect(&self.db_url).await
    }
}

/// Knobs shared by both partitioners.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PartitionerConfig {
    /// How many base records are read per scan while bulk partitioning.
    pub batch_size: usize,
    /// Range partition `i` is named `{range_prefix}{i}`.
    pub range_prefix: String,
    /// Round-robin partition `i` is named `{round_robin_prefix}{i}`.
    pub round_robin_prefix: String,
}

impl Default for PartitionerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            range_prefix: DEFAULT_RANGE_PREFIX.to_owned(),
            round_robin_prefix: DEFAULT_ROUND_ROBIN_PREFIX.to_owned(),
        }
    }
}
