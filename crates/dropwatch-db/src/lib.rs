//! # dropwatch-db
//!
//! PostgreSQL + pgvector storage layer for dropwatch.
//!
//! This crate provides:
//! - Connection pool management
//! - Idempotent update persistence keyed on `(source_message_link, update_key)`
//! - Cosine similarity search with pgvector
//! - An in-memory store with the same semantics for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use dropwatch_db::{Database, UpdateRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/dropwatch").await?;
//!     db.migrate().await?;
//!     let n = db.updates.count_for_link("https://t.me/c/1/2").await?;
//!     println!("{} rows", n);
//!     Ok(())
//! }
//! ```

pub mod memory;
pub mod pool;
pub mod updates;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use dropwatch_core::*;

pub use memory::{cosine_similarity, MemoryRow, MemoryUpdateStore};
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use updates::{PgUpdateRepository, UPDATES_TABLE};

/// Database handle aggregating the repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Project update repository and similarity search.
    pub updates: PgUpdateRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            updates: PgUpdateRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect to database with default pool configuration.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
