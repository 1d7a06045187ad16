//! SQLite node database backing a [`Trie`](newsnet_trie::Trie).
//!
//! One file per trie. The file is kept in rollback-journal mode so that the
//! whole trie is a single file that can be renamed atomically.

use alloy::primitives::B256;
use anyhow::Context;
use async_trait::async_trait;
use newsnet_trie::{NodeDb, TrieError};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Trie nodes stored in a dedicated SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteNodeDb {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteNodeDb {
    /// Open (or create) the trie database at `path` and migrate it.
    pub async fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open trie database {}", path.display()))?;

        sqlx::migrate!("./migrations/trie")
            .run(&pool)
            .await
            .with_context(|| format!("Failed to migrate trie database {}", path.display()))?;

        debug!(path = %path.display(), "Trie database ready");

        Ok(Self { pool, path })
    }

    /// File backing this database.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every connection, releasing the file.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Number of stored node rows.
    pub async fn node_count(&self) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM nodes")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count trie nodes")?;
        Ok(count as u64)
    }
}

fn storage_error(e: sqlx::Error) -> TrieError {
    TrieError::Storage(e.to_string())
}

#[async_trait]
impl NodeDb for SqliteNodeDb {
    async fn get_node(&self, hash: B256) -> newsnet_trie::Result<Option<Vec<u8>>> {
        sqlx::query_scalar::<_, Vec<u8>>("SELECT encoded FROM nodes WHERE hash = ?")
            .bind(hash.as_slice())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)
    }

    async fn commit(&self, nodes: Vec<(B256, Vec<u8>)>, root: B256) -> newsnet_trie::Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        for (hash, encoded) in &nodes {
            sqlx::query("INSERT OR IGNORE INTO nodes (hash, encoded) VALUES (?, ?)")
                .bind(hash.as_slice())
                .bind(encoded.as_slice())
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
        }

        sqlx::query(
            r#"
            INSERT INTO root (id, hash, updated_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                hash = excluded.hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(root.as_slice())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        tx.commit().await.map_err(storage_error)
    }

    async fn load_root(&self) -> newsnet_trie::Result<Option<B256>> {
        let raw: Option<Vec<u8>> = sqlx::query_scalar("SELECT hash FROM root WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        match raw {
            None => Ok(None),
            Some(bytes) if bytes.len() == 32 => Ok(Some(B256::from_slice(&bytes))),
            Some(bytes) => Err(TrieError::Storage(format!(
                "root pointer has {} bytes",
                bytes.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsnet_trie::{Trie, EMPTY_ROOT};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_trie_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("messages.db");

        let db = SqliteNodeDb::open(&path).await.unwrap();
        let trie = Trie::open(Arc::new(db.clone())).await.unwrap();
        assert_eq!(trie.root(), EMPTY_ROOT);

        trie.put(b"alpha", b"one".to_vec()).await.unwrap();
        trie.put(b"beta", b"two".to_vec()).await.unwrap();
        let root = trie.root();
        db.close().await;

        let db = SqliteNodeDb::open(&path).await.unwrap();
        let reopened = Trie::open(Arc::new(db)).await.unwrap();
        assert_eq!(reopened.root(), root);
        assert_eq!(reopened.get(b"beta").await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_commit_ignores_existing_rows() {
        let dir = TempDir::new().unwrap();
        let db = SqliteNodeDb::open(dir.path().join("t.db")).await.unwrap();
        let hash = B256::repeat_byte(0x11);

        db.commit(vec![(hash, vec![1, 2, 3])], hash).await.unwrap();
        db.commit(vec![(hash, vec![1, 2, 3])], hash).await.unwrap();

        assert_eq!(db.node_count().await.unwrap(), 1);
        assert_eq!(db.get_node(hash).await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(db.load_root().await.unwrap(), Some(hash));
    }
}
