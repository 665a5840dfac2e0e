//! Storage collaborator for the posecraft pipeline.
//!
//! [`Store`] is the contract the orchestration layer depends on.
//! [`MemoryStore`] backs it in-process; [`PgStore`] backs it with
//! PostgreSQL through the zero-sized repositories in [`repositories`].

use sqlx::postgres::PgPoolOptions;

pub mod error;
pub mod memory;
pub mod models;
pub mod pg;
pub mod repositories;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use pg::PgStore;
pub use store::{InterruptedReset, Store};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Apply pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
