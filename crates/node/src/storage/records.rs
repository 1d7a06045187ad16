//! Per-path record log storage operations.

use super::{PathRecord, Storage};
use anyhow::{Context, Result};
use sqlx::Row;

impl Storage {
    /// Append `(key, value)` to the log of `path`.
    ///
    /// Appends are idempotent: an existing key is left untouched and `false`
    /// is returned.
    pub async fn append_record(&self, path: &str, key: &str, value: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO path_records (path, key, value)
            VALUES (?, ?, ?)
            ON CONFLICT(path, key) DO NOTHING
            "#,
        )
        .bind(path)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to append record {} to path {}", key, path))?;

        Ok(result.rows_affected() > 0)
    }

    /// Every record of `path` in key order.
    pub async fn records(&self, path: &str) -> Result<Vec<PathRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT key, value
            FROM path_records
            WHERE path = ?
            ORDER BY key ASC
            "#,
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to fetch records for path {}", path))?;

        Ok(rows
            .iter()
            .map(|row| PathRecord {
                key: row.get("key"),
                value: row.get("value"),
            })
            .collect())
    }

    /// Number of records of `path`.
    pub async fn count_records(&self, path: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM path_records WHERE path = ?")
            .bind(path)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to count records for path {}", path))?;

        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::test_support::temp_storage;

    #[tokio::test]
    async fn test_append_is_idempotent() {
        let (storage, _file) = temp_storage().await;

        assert!(storage.append_record("p", "0a", "first").await.unwrap());
        assert!(!storage.append_record("p", "0a", "second").await.unwrap());

        let records = storage.records("p").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, "first");
    }

    #[tokio::test]
    async fn test_records_ordered_by_key_and_scoped_to_path() {
        let (storage, _file) = temp_storage().await;

        storage.append_record("p", "0000000000000095", "c").await.unwrap();
        storage.append_record("p", "0000000000000065", "a").await.unwrap();
        storage.append_record("p", "0000000000000078", "b").await.unwrap();
        storage.append_record("other", "0000000000000001", "x").await.unwrap();

        let values: Vec<String> = storage
            .records("p")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.value)
            .collect();
        assert_eq!(values, vec!["a", "b", "c"]);
        assert_eq!(storage.count_records("p").await.unwrap(), 3);
        assert_eq!(storage.count_records("other").await.unwrap(), 1);
    }
}
