//! Database connection management using sqlx

use crate::config::DatabaseConfig;
use crate::error::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Build the connection pool. Connections are opened lazily, one per
/// in-flight query, and go back to the pool when the query's scope ends.
pub fn init_pool(config: &DatabaseConfig, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect_lazy_with(config.connect_options()?);
    info!("Database pool configured for {}:{}/{}", config.host, config.port, config.name);
    Ok(pool)
}

/// Open the pool and make one round-trip, for `check-db` and startup.
pub async fn connect_checked(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(config.connect_options()?)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}
