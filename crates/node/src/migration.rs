//! Offline deduplication of a message trie.
//!
//! Every leaf of the live trie is replayed through the write path into a
//! fresh trie next to it. The fresh trie then replaces the live file with a
//! rename, and the previous file is kept as `<path>-old`.
//!
//! Run with the node stopped: the live file is swapped underneath any open
//! connection.

use anyhow::Context;
use futures::TryStreamExt;
use newsnet_core::SignedMessage;
use newsnet_trie::Trie;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::identity::IdentityResolver;
use crate::registry::Registry;
use crate::storage::SqliteNodeDb;
use crate::writer::{MessageStore, WriteOutcome};

/// Why a migration did not complete.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Failed before the swap. The live trie is untouched and the migration
    /// can be retried.
    #[error("Migration incomplete, live store untouched: {0}")]
    Incomplete(String),

    /// Every leaf was rejected, usually because the allowlist is empty.
    /// Nothing was swapped; rerun with [`DedupMigration::force`] to accept
    /// an empty trie.
    #[error("Migration kept none of {scanned} leaves, refusing to swap")]
    NothingKept {
        /// Leaves read from the live trie
        scanned: u64,
    },

    /// Failed during the swap.
    #[error("Migration swap failed: {0}")]
    Swap(String),
}

/// Totals of a completed migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Leaves read from the live trie
    pub scanned: u64,
    /// Leaves written to the new trie
    pub kept: u64,
    /// Duplicates and invalid leaves
    pub skipped: u64,
    /// Root of the new live trie
    pub root: alloy::primitives::B256,
    /// Where the previous live trie now lives
    pub retired: PathBuf,
}

/// Rebuilds the trie at `live_path` without duplicates.
pub struct DedupMigration {
    live_path: PathBuf,
    registry: Registry,
    force: bool,
}

impl DedupMigration {
    /// Prepare a migration of the trie file at `live_path`. Leaves are checked
    /// against `registry` as of the run.
    pub fn new(live_path: impl Into<PathBuf>, registry: Registry) -> Self {
        Self {
            live_path: live_path.into(),
            registry,
            force: false,
        }
    }

    /// Swap even when no leaf survives the replay.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// `<path>-copy`
    pub fn staging_path(&self) -> PathBuf {
        suffixed(&self.live_path, "-copy")
    }

    /// `<path>-old`
    pub fn retired_path(&self) -> PathBuf {
        suffixed(&self.live_path, "-old")
    }

    /// Rebuild and swap.
    pub async fn run(&self) -> Result<MigrationReport, MigrationError> {
        info!(path = %self.live_path.display(), "Starting dedup migration");

        let (scanned, kept, root) = match self.stage().await {
            Ok(staged) => staged,
            Err(e) => {
                self.discard_staging().await;
                return Err(MigrationError::Incomplete(format!("{:#}", e)));
            }
        };
        let skipped = scanned - kept;

        if kept == 0 && scanned > 0 && !self.force {
            warn!(
                path = %self.live_path.display(),
                scanned,
                "No leaf survived the replay, live trie left in place"
            );
            self.discard_staging().await;
            return Err(MigrationError::NothingKept { scanned });
        }

        self.swap()
            .await
            .map_err(|e| MigrationError::Swap(format!("{:#}", e)))?;

        info!(
            path = %self.live_path.display(),
            scanned,
            kept,
            skipped,
            %root,
            "Dedup migration complete"
        );

        Ok(MigrationReport {
            scanned,
            kept,
            skipped,
            root,
            retired: self.retired_path(),
        })
    }

    /// Build the deduplicated trie at the staging path and sync it to disk.
    async fn stage(&self) -> anyhow::Result<(u64, u64, alloy::primitives::B256)> {
        anyhow::ensure!(
            tokio::fs::try_exists(&self.live_path).await.unwrap_or(false),
            "Live trie {} does not exist",
            self.live_path.display()
        );

        let staging = self.staging_path();
        if tokio::fs::try_exists(&staging).await.unwrap_or(false) {
            warn!(path = %staging.display(), "Discarding stale staging trie");
            tokio::fs::remove_file(&staging)
                .await
                .with_context(|| format!("Failed to remove stale {}", staging.display()))?;
        }

        let live_db = Arc::new(SqliteNodeDb::open(&self.live_path).await?);
        let live = Trie::open(live_db.clone())
            .await
            .context("Failed to open live trie")?;

        let staging_db = Arc::new(SqliteNodeDb::open(&staging).await?);
        let store = MessageStore::new(
            Trie::open(staging_db.clone())
                .await
                .context("Failed to open staging trie")?,
            self.registry.clone(),
        );

        let result = replay(&live, &store).await;

        live_db.close().await;
        staging_db.close().await;
        let (scanned, kept) = result?;

        sync_file(&staging).await?;
        Ok((scanned, kept, store.trie().root()))
    }

    /// Retire the live file to `-old` and rename the staging file over it.
    async fn swap(&self) -> anyhow::Result<()> {
        let staging = self.staging_path();
        let retired = self.retired_path();

        if tokio::fs::try_exists(&retired).await.unwrap_or(false) {
            tokio::fs::remove_file(&retired)
                .await
                .with_context(|| format!("Failed to remove previous {}", retired.display()))?;
        }

        // the live path keeps pointing at a valid trie throughout
        tokio::fs::hard_link(&self.live_path, &retired)
            .await
            .with_context(|| format!("Failed to link live trie to {}", retired.display()))?;
        tokio::fs::rename(&staging, &self.live_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to rename {} over {}",
                    staging.display(),
                    self.live_path.display()
                )
            })?;

        if let Some(parent) = self.live_path.parent() {
            sync_dir(parent).await?;
        }
        Ok(())
    }

    async fn discard_staging(&self) {
        let staging = self.staging_path();
        if let Err(e) = tokio::fs::remove_file(&staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %staging.display(), "Failed to remove staging trie: {}", e);
            }
        }
    }
}

/// Submit every live leaf to `store`. Returns `(scanned, kept)`.
async fn replay(live: &Trie, store: &MessageStore) -> anyhow::Result<(u64, u64)> {
    let identity = IdentityResolver::new();
    let mut scanned = 0u64;
    let mut kept = 0u64;

    let mut leaves = live.leaves();
    while let Some((key, value)) = leaves
        .try_next()
        .await
        .context("Failed to read live trie")?
    {
        scanned += 1;
        let message: SignedMessage = match serde_json::from_slice(&value) {
            Ok(message) => message,
            Err(e) => {
                warn!(key = %format!("0x{}", hex::encode(&key)), "Skipping unreadable leaf: {}", e);
                continue;
            }
        };

        let signer = match identity.recover_signer(&message) {
            Ok(signer) => signer,
            Err(e) => {
                debug!(key = %format!("0x{}", hex::encode(&key)), "Dropping leaf: {}", e);
                continue;
            }
        };

        match store.submit(&message, signer).await? {
            WriteOutcome::Accepted { .. } => kept += 1,
            WriteOutcome::Rejected(reason) => {
                debug!(key = %format!("0x{}", hex::encode(&key)), "Dropping leaf: {}", reason)
            }
        }
    }

    Ok((scanned, kept))
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

async fn sync_file(path: &Path) -> anyhow::Result<()> {
    tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?
        .sync_all()
        .await
        .with_context(|| format!("Failed to sync {}", path.display()))
}

#[cfg(unix)]
async fn sync_dir(path: &Path) -> anyhow::Result<()> {
    sync_file(path).await
}

#[cfg(not(unix))]
async fn sync_dir(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}
