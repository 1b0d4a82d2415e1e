//! Database pool and schema migrations

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tplatform_core::DatabaseConfig;

/// Open the connection pool described by `config`
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .max_lifetime(Duration::from_secs(5 * 60))
        .idle_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .test_before_acquire(true)
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database pool ready"
    );
    Ok(pool)
}

/// Apply the embedded migrations in `migrations/`
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}
