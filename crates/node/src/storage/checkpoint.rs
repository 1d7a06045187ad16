//! Crawl checkpoint storage operations.

use super::{CrawlCheckpoint, Storage};
use anyhow::{Context, Result};
use sqlx::Row;

impl Storage {
    /// Last processed block of `path`, if the path has run before.
    pub async fn get_checkpoint(&self, path: &str) -> Result<Option<u64>> {
        let last: Option<i64> =
            sqlx::query_scalar("SELECT last_block FROM checkpoints WHERE path = ?")
                .bind(path)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("Failed to fetch checkpoint for path {}", path))?;

        Ok(last.map(|b| b as u64))
    }

    /// Advance the checkpoint of `path` to `block`.
    ///
    /// Checkpoints only move forward: a lower block leaves the stored value.
    pub async fn set_checkpoint(&self, path: &str, block: u64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO checkpoints (path, last_block, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                last_block = MAX(last_block, excluded.last_block),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(path)
        .bind(block as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update checkpoint for path {}", path))?;

        Ok(())
    }

    /// All checkpoints, by path name.
    pub async fn list_checkpoints(&self) -> Result<Vec<CrawlCheckpoint>> {
        let rows = sqlx::query(
            r#"
            SELECT path, last_block, updated_at
            FROM checkpoints
            ORDER BY path
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list checkpoints")?;

        Ok(rows
            .iter()
            .map(|row| CrawlCheckpoint {
                path: row.get("path"),
                last_block: row.get::<i64, _>("last_block") as u64,
                updated_at: row.get("updated_at"),
            })
            .collect())
    }
}
