//! Postgres connectivity: environment-driven pool construction plus the
//! schema migration run, completed before the router accepts any traffic.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

const DEFAULT_POOL_SIZE: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("DATABASE_URL is not set")]
    MissingUrl,
    #[error(transparent)]
    Connect(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Pool size from an optional `DB_MAX_CONNECTIONS` value. Unparseable values
/// fall back to the default rather than aborting startup.
fn pool_size(raw: Option<&str>) -> u32 {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(DEFAULT_POOL_SIZE)
}

/// Connect using `DATABASE_URL` and bring the schema current.
///
/// # Errors
///
/// `MissingUrl` when `DATABASE_URL` is unset; `Connect`/`Migrate` when the
/// database is unreachable or a migration fails.
pub async fn connect_from_env() -> Result<PgPool, DbError> {
    let database_url = std::env::var("DATABASE_URL").map_err(|_| DbError::MissingUrl)?;
    let size = pool_size(std::env::var("DB_MAX_CONNECTIONS").ok().as_deref());

    let pool = PgPoolOptions::new()
        .max_connections(size)
        .connect(&database_url)
        .await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;

    Ok(pool)
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
