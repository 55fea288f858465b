//! Database connection pool management
//!
//! Builds and verifies the deadpool-postgres pool used by direct-chat-service.

mod metrics;

pub use metrics::{acquire_with_metrics, update_pool_metrics};

use deadpool_postgres::tokio_postgres::{Config as PgConfig, NoTls};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
pub use deadpool_postgres::PoolError;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

pub type PgPool = Pool;

#[derive(Debug, Error)]
pub enum DbPoolError {
    #[error("invalid database url: {0}")]
    InvalidUrl(String),

    #[error("failed to build pool: {0}")]
    Build(String),

    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("connection verification timed out after {0}s")]
    VerifyTimeout(u64),
}

/// Database connection pool configuration
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Service name for metrics labeling
    pub service_name: String,
    /// PostgreSQL connection URL
    pub database_url: String,
    pub max_connections: u32,
    /// Connection creation timeout (new connection to PostgreSQL)
    pub connect_timeout_secs: u64,
    /// Connection acquisition timeout (get connection from pool)
    pub acquire_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            service_name: String::from("unknown"),
            database_url: String::new(),
            max_connections: 16,
            connect_timeout_secs: 5,
            acquire_timeout_secs: 10,
        }
    }
}

impl DbConfig {
    /// Read pool settings from the environment, keeping defaults for anything unset.
    pub fn from_env(service_name: &str, database_url: &str) -> Self {
        let defaults = Self::default();
        Self {
            service_name: service_name.to_string(),
            database_url: database_url.to_string(),
            max_connections: env_or("DB_MAX_CONNECTIONS", defaults.max_connections),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs),
            acquire_timeout_secs: env_or("DB_ACQUIRE_TIMEOUT_SECS", defaults.acquire_timeout_secs),
        }
    }

    pub fn log_config(&self) {
        info!(
            service = %self.service_name,
            max_connections = self.max_connections,
            connect_timeout_secs = self.connect_timeout_secs,
            acquire_timeout_secs = self.acquire_timeout_secs,
            "Database pool configuration"
        );
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Build a deadpool-postgres pool and verify it with `SELECT 1`.
///
/// Failing here is the only fatal store error for the service: the caller
/// aborts startup.
pub async fn create_pool(config: DbConfig) -> Result<PgPool, DbPoolError> {
    debug!(
        service = %config.service_name,
        max = config.max_connections,
        "Creating database pool"
    );

    let pg_config: PgConfig = config
        .database_url
        .parse()
        .map_err(|e: tokio_postgres::Error| DbPoolError::InvalidUrl(e.to_string()))?;

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
    let pool = Pool::builder(mgr)
        .max_size(config.max_connections as usize)
        .wait_timeout(Some(Duration::from_secs(config.acquire_timeout_secs)))
        .create_timeout(Some(Duration::from_secs(config.connect_timeout_secs)))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| DbPoolError::Build(e.to_string()))?;

    let verify = async {
        let client = pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok::<(), DbPoolError>(())
    };

    match tokio::time::timeout(Duration::from_secs(config.connect_timeout_secs), verify).await {
        Ok(Ok(())) => {
            info!(service = %config.service_name, "Database pool created and verified");
            update_pool_metrics(&pool, &config.service_name);
            Ok(pool)
        }
        Ok(Err(e)) => {
            error!(service = %config.service_name, error = %e, "Database connection verification failed");
            Err(e)
        }
        Err(_) => {
            error!(
                service = %config.service_name,
                timeout_secs = config.connect_timeout_secs,
                "Database connection verification timeout"
            );
            Err(DbPoolError::VerifyTimeout(config.connect_timeout_secs))
        }
    }
}
