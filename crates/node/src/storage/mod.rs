//! Storage layer for the newsnet node.
//!
//! This module provides database operations for:
//! - Crawl checkpoints (per-path progress tracking)
//! - Path records (the ordered log each crawler path appends to)
//! - Failed logs (enrichment failures awaiting retry)
//! - Archived raw logs
//!
//! Trie nodes live in separate per-trie database files, see [`trie_db`].

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub mod archive;
pub mod checkpoint;
pub mod failed;
pub mod records;
pub mod trie_db;
pub mod types;

pub use trie_db::SqliteNodeDb;
pub use types::*;

/// Database storage for crawler state.
///
/// Provides async access to SQLite database with connection pooling.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance with the given database URL.
    ///
    /// This will create the database file if it doesn't exist. Pool sizes
    /// default to 5 and 1 connections.
    ///
    /// # Example
    /// ```no_run
    /// # use newsnet_node::storage::Storage;
    /// # async fn example() -> anyhow::Result<()> {
    /// let storage = Storage::new("sqlite://crawler.db", None, None).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(
        database_url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.unwrap_or(5))
            .min_connections(min_connections.unwrap_or(1))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Create a new storage instance with a specific file path.
    pub async fn new_with_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let database_url = format!("sqlite://{}", path.display());
        Self::new(&database_url, None, None).await
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running crawler database migrations");

        sqlx::migrate!("./migrations/crawler")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection");
        self.pool.close().await;
    }

    /// Get database statistics.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let path_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM checkpoints")
            .fetch_one(&self.pool)
            .await?;

        let record_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM path_records")
            .fetch_one(&self.pool)
            .await?;

        let failed_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM failed_logs")
            .fetch_one(&self.pool)
            .await?;

        let archived_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM archived_logs")
            .fetch_one(&self.pool)
            .await?;

        Ok(DatabaseStats {
            path_count: path_count as u64,
            record_count: record_count as u64,
            failed_count: failed_count as u64,
            archived_count: archived_count as u64,
        })
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Storage;
    use tempfile::NamedTempFile;

    /// A migrated storage on a temp file. Keep the file alive for the test.
    pub async fn temp_storage() -> (Storage, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(file.path()).await.unwrap();
        storage.run_migrations().await.unwrap();
        (storage, file)
    }
}
