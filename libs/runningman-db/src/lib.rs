pub mod db;
pub mod ledger;
pub mod models;
pub mod repositories;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

pub use sqlx;
use anyhow::{Context, Result};

pub async fn connect(url: &str) -> Result<sqlx::PgPool> {
    db::check_database_url(url)?;

    let pool = db::pool_options()
        .connect(url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run DB migrations")?;

    Ok(pool)
}
