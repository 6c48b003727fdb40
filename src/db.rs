use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Creates the Postgres connection pool, verifying connectivity with a
/// bounded handshake as required by the concurrency model (5s startup
/// timeout).
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .map_err(|e| AppError::Fatal(format!("failed to connect to database: {e}")))?;

    tokio::time::timeout(Duration::from_secs(5), sqlx::query("SELECT 1").execute(&pool))
        .await
        .map_err(|_| AppError::Fatal("database handshake timed out".into()))?
        .map_err(|e| AppError::Fatal(format!("database handshake failed: {e}")))?;

    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AppError::Fatal(format!("migration failed: {e}")))?;
    Ok(())
}
