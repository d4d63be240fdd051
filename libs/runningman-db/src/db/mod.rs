use anyhow::{bail, Result};
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

pub fn pool_options() -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
}

/// Rejects anything that is not a postgres connection string before we try to dial it.
pub fn check_database_url(url: &str) -> Result<()> {
    if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
        bail!("DATABASE_URL must start with postgres:// or postgresql://");
    }
    Ok(())
}

/// True when `err` carries a database failure worth another attempt:
/// connection and pool trouble, or a serialization/deadlock abort.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<sqlx::Error>())
        .is_some_and(|e| match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(db) => db
                .code()
                .is_some_and(|code| code.starts_with("08") || code == "40001" || code == "40P01"),
            _ => false,
        })
}
