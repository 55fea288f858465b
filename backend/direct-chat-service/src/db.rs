use db_pool::{create_pool as create_pg_pool, DbConfig, DbPoolError, PgPool};
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::{Connection, PgConnection};
use thiserror::Error;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error(transparent)]
    Pool(#[from] DbPoolError),

    #[error("migration connection failed: {0}")]
    Connect(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] MigrateError),
}

/// Apply pending migrations over a short-lived connection, then build the
/// deadpool pool the stores run on.
pub async fn init_pool(database_url: &str) -> Result<PgPool, DbInitError> {
    let cfg = DbConfig::from_env("direct-chat-service", database_url);
    cfg.log_config();

    let mut conn = PgConnection::connect(database_url).await?;
    MIGRATOR.run(&mut conn).await?;
    conn.close().await?;
    tracing::info!(migrations = MIGRATOR.iter().count(), "database migrations complete");

    Ok(create_pg_pool(cfg).await?)
}
