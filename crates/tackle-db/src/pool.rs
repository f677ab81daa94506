//! Connection pool for the central graph and the worker queue.
//!
//! One pool serves three kinds of callers: HTTP reads, the queue poller, and
//! the status consumer, whose merge transaction keeps a connection busy for
//! the whole import. The defaults size the pool and its timeouts for that mix.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use tackle_core::{Error, Result};

pub const APPLICATION_NAME: &str = "tackle-hub";

/// Queue poller plus the consumer's merge transaction.
pub const DEFAULT_MIN_CONNECTIONS: u32 = 2;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;

/// Readers may queue for a connection behind a running merge.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 60;

/// Upper bound for one statement; a merge issues many short ones.
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    /// `None` leaves the server default in place.
    pub statement_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            statement_timeout: Some(Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS)),
        }
    }
}

impl PoolConfig {
    /// Overrides from `DB_MAX_CONNECTIONS`, `DB_ACQUIRE_TIMEOUT_SECS` and
    /// `DB_STATEMENT_TIMEOUT_SECS` (0 disables the statement timeout).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let mut config = Self::default();
        if let Some(n) = number("DB_MAX_CONNECTIONS") {
            config.max_connections = (n as u32).max(config.min_connections);
        }
        if let Some(secs) = number("DB_ACQUIRE_TIMEOUT_SECS") {
            config.acquire_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = number("DB_STATEMENT_TIMEOUT_SECS") {
            config.statement_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        config
    }

    fn connect_options(&self, database_url: &str) -> Result<PgConnectOptions> {
        let options = database_url
            .parse::<PgConnectOptions>()
            .map_err(Error::Database)?
            .application_name(APPLICATION_NAME);
        Ok(match self.statement_timeout {
            Some(timeout) => {
                options.options([("statement_timeout", format!("{}ms", timeout.as_millis()))])
            }
            None => options,
        })
    }
}

pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    info!(
        subsystem = "db",
        component = "pool",
        op = "create",
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        statement_timeout_secs = config.statement_timeout.map(|t| t.as_secs()),
        "Creating database connection pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(config.connect_options(database_url)?)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "established",
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}

/// Log pool usage. With no idle connection left, readers are waiting behind
/// long transactions such as a merge.
pub fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();
    debug!(
        subsystem = "db",
        component = "pool",
        op = "metrics",
        pool_size = size,
        pool_idle = idle,
        "Pool health check"
    );
    if idle == 0 && size > 0 {
        warn!(
            subsystem = "db",
            component = "pool",
            pool_size = size,
            "Connection pool has no idle connections"
        );
    }
}
