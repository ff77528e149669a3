use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

use crate::config::DatabaseConfig;

pub type Db = Pool<Postgres>;

/// Opens the pool and applies pending migrations.
pub async fn connect(config: &DatabaseConfig) -> Result<Db> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
        .context("Failed to connect to DATABASE_URL")?;

    // crate-relative path for sqlx migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    Ok(pool)
}
