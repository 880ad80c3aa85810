//! Project State Store implementations.
//!
//! Two interchangeable backends for
//! [`ProjectStore`](nichepress_core::store::ProjectStore):
//!
//! - [`MemoryStore`]: per-project interior locking, used in development
//!   mode and by every test suite.
//! - [`PgProjectStore`]: PostgreSQL via sqlx for production deployments;
//!   `save` is transactional per project.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgProjectStore;

/// Convenience alias for the PostgreSQL connection pool.
pub type DbPool = sqlx::PgPool;

/// Create a connection pool for the given database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Verify the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
