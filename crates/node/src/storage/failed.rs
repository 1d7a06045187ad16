//! Storage for logs whose enrichment failed.

use super::{FailedLog, Storage};
use anyhow::{Context, Result};
use sqlx::Row;

impl Storage {
    /// Park a raw log for retry, counting the attempt.
    pub async fn park_failed_log(
        &self,
        path: &str,
        key: &str,
        raw_log: &str,
        reason: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO failed_logs (path, key, raw_log, reason, attempts, updated_at)
            VALUES (?, ?, ?, ?, 1, ?)
            ON CONFLICT(path, key) DO UPDATE SET
                reason = excluded.reason,
                attempts = failed_logs.attempts + 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(path)
        .bind(key)
        .bind(raw_log)
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to park log {} of path {}", key, path))?;

        Ok(())
    }

    /// Parked logs of `path`, oldest first.
    pub async fn failed_logs(&self, path: &str) -> Result<Vec<FailedLog>> {
        let rows = sqlx::query(
            r#"
            SELECT path, key, raw_log, reason, attempts
            FROM failed_logs
            WHERE path = ?
            ORDER BY key ASC
            "#,
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to fetch failed logs for path {}", path))?;

        Ok(rows
            .iter()
            .map(|row| FailedLog {
                path: row.get("path"),
                key: row.get("key"),
                raw_log: row.get("raw_log"),
                reason: row.get("reason"),
                attempts: row.get::<i64, _>("attempts") as u32,
            })
            .collect())
    }

    /// Forget a parked log after it loaded.
    pub async fn clear_failed_log(&self, path: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM failed_logs WHERE path = ? AND key = ?")
            .bind(path)
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to clear failed log {} of path {}", key, path))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::test_support::temp_storage;

    #[tokio::test]
    async fn test_park_counts_attempts() {
        let (storage, _file) = temp_storage().await;

        storage
            .park_failed_log("p", "k1", "{}", "receipt timeout")
            .await
            .unwrap();
        storage
            .park_failed_log("p", "k1", "{}", "receipt missing")
            .await
            .unwrap();

        let failed = storage.failed_logs("p").await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 2);
        assert_eq!(failed[0].reason, "receipt missing");

        storage.clear_failed_log("p", "k1").await.unwrap();
        assert!(storage.failed_logs("p").await.unwrap().is_empty());
    }
}
