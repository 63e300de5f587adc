use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::config::StoreConfig;
use crate::store::StoreError;

pub type DbPool = PgPool;

pub async fn create_pool(config: &StoreConfig) -> Result<DbPool, anyhow::Error> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is required for the postgres store")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(url)
        .await
        .context("Failed to connect to database")?;

    Ok(pool)
}

pub async fn run_migrations(pool: &DbPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}

pub async fn health_check(pool: &DbPool) -> Result<(), StoreError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
