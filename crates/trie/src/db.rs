//! Pluggable node storage.

use std::collections::HashMap;

use alloy_primitives::B256;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

/// Content-addressed node database backing a [`crate::Trie`].
///
/// Rows are immutable: a hash always maps to the same encoding, so
/// implementations may ignore re-inserts of an existing hash.
#[async_trait]
pub trait NodeDb: Send + Sync {
    /// Fetch the encoding stored under `hash`.
    async fn get_node(&self, hash: B256) -> Result<Option<Vec<u8>>>;

    /// Persist `nodes`, then point the root at `root`, atomically.
    async fn commit(&self, nodes: Vec<(B256, Vec<u8>)>, root: B256) -> Result<()>;

    /// The last committed root, if any.
    async fn load_root(&self) -> Result<Option<B256>>;
}

/// In-memory node database.
#[derive(Debug, Default)]
pub struct MemoryNodeDb {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    nodes: HashMap<B256, Vec<u8>>,
    root: Option<B256>,
}

impl MemoryNodeDb {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored node rows.
    pub async fn len(&self) -> usize {
        self.state.read().await.nodes.len()
    }

    /// Whether no node has been stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop a stored node. Only useful for simulating corruption.
    pub async fn remove_node(&self, hash: B256) -> Option<Vec<u8>> {
        self.state.write().await.nodes.remove(&hash)
    }

    /// Overwrite a stored node. Only useful for simulating corruption.
    pub async fn overwrite_node(&self, hash: B256, encoded: Vec<u8>) {
        self.state.write().await.nodes.insert(hash, encoded);
    }
}

#[async_trait]
impl NodeDb for MemoryNodeDb {
    async fn get_node(&self, hash: B256) -> Result<Option<Vec<u8>>> {
        Ok(self.state.read().await.nodes.get(&hash).cloned())
    }

    async fn commit(&self, nodes: Vec<(B256, Vec<u8>)>, root: B256) -> Result<()> {
        let mut state = self.state.write().await;
        for (hash, encoded) in nodes {
            state.nodes.entry(hash).or_insert(encoded);
        }
        state.root = Some(root);
        Ok(())
    }

    async fn load_root(&self) -> Result<Option<B256>> {
        Ok(self.state.read().await.root)
    }
}
