//! # bidwise-db
//!
//! Storage layer for bidwise document analysis.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL repositories for the analysis queue and file records
//! - A filesystem object store for uploaded documents
//! - In-memory implementations of all three for tests and database-less runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use bidwise_db::{Database, EnqueueRequest, AnalysisType, QueueRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/bidwise").await?;
//!     let item = db
//!         .queue
//!         .enqueue_deduplicated(EnqueueRequest::new(file_id, AnalysisType::FinancialDocument))
//!         .await?;
//!     println!("Queued: {:?}", item.map(|i| i.id));
//!     Ok(())
//! }
//! ```
pub mod files;
pub mod memory;
pub mod pool;
pub mod queue;
pub mod storage;

// Re-export core types
pub use bidwise_core::*;

pub use files::PgFileRecordRepository;
pub use memory::{MemoryFileRecordRepository, MemoryObjectStore, MemoryQueueRepository};
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use queue::PgQueueRepository;
pub use storage::FilesystemStore;

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Analysis queue repository.
    pub queue: PgQueueRepository,
    /// Uploaded file records.
    pub files: PgFileRecordRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            queue: PgQueueRepository::new(pool.clone()),
            files: PgFileRecordRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Connect with a custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
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

impl Clone for Database {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}
