//! Raw log archive for paths with `archive = true`.

use super::Storage;
use anyhow::{Context, Result};

impl Storage {
    /// Keep the raw extracted logs of one tick. Re-archiving a key is a no-op.
    pub async fn archive_logs(&self, path: &str, logs: &[(String, String)]) -> Result<()> {
        if logs.is_empty() {
            return Ok(());
        }
        let now = chrono::Utc::now().timestamp();

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin archive transaction")?;

        for (key, raw_log) in logs {
            sqlx::query(
                r#"
                INSERT INTO archived_logs (path, key, raw_log, archived_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(path, key) DO NOTHING
                "#,
            )
            .bind(path)
            .bind(key)
            .bind(raw_log)
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to archive log {} of path {}", key, path))?;
        }

        tx.commit()
            .await
            .context("Failed to commit archive transaction")?;

        Ok(())
    }

    /// Number of archived logs of `path`.
    pub async fn count_archived(&self, path: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM archived_logs WHERE path = ?")
            .bind(path)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count archived logs")?;

        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::test_support::temp_storage;

    #[tokio::test]
    async fn test_archive_is_idempotent() {
        let (storage, _file) = temp_storage().await;
        let logs = vec![
            ("a".to_string(), "{}".to_string()),
            ("b".to_string(), "{}".to_string()),
        ];

        storage.archive_logs("p", &logs).await.unwrap();
        storage.archive_logs("p", &logs).await.unwrap();
        assert_eq!(storage.count_archived("p").await.unwrap(), 2);
    }
}
