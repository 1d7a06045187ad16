//! The Merkle-Patricia trie store.

use std::sync::Arc;

use alloy_primitives::{keccak256, B256};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::db::{MemoryNodeDb, NodeDb};
use crate::error::{Result, TrieError};
use crate::nibbles::{common_prefix, from_nibbles, to_nibbles};
use crate::node::{NodeRef, TrieNode};
use crate::EMPTY_ROOT;

/// A stored `(key, value)` pair.
pub type Leaf = (Vec<u8>, Vec<u8>);

/// Nodes created by one write, keyed by hash.
type Batch = Vec<(B256, Vec<u8>)>;

/// A Merkle-Patricia trie over a [`NodeDb`].
///
/// Cloning is cheap and clones share the same root and writer lock. Writes
/// are serialized; readers resolve against whichever root was current when
/// they started, and since node rows are written before the root pointer
/// moves they never see a half-applied write.
///
/// # Examples
///
/// ```
/// use newsnet_trie::{Trie, EMPTY_ROOT};
///
/// # #[tokio::main]
/// # async fn main() {
/// let trie = Trie::in_memory();
/// assert_eq!(trie.root(), EMPTY_ROOT);
///
/// trie.put(b"dog", b"puppy".to_vec()).await.unwrap();
/// assert_eq!(trie.get(b"dog").await.unwrap(), Some(b"puppy".to_vec()));
/// # }
/// ```
#[derive(Clone)]
pub struct Trie {
    inner: Arc<TrieInner>,
}

struct TrieInner {
    db: Arc<dyn NodeDb>,
    root: watch::Sender<B256>,
    writer: Mutex<()>,
}

enum Frame {
    Node(Vec<u8>, NodeRef),
    Emit(Vec<u8>, Vec<u8>),
}

impl Trie {
    /// Open a trie at the database's last committed root.
    pub async fn open(db: Arc<dyn NodeDb>) -> Result<Self> {
        let root = db.load_root().await?.unwrap_or(EMPTY_ROOT);
        debug!(%root, "Opened trie");
        Ok(Self::with_root(db, root))
    }

    /// An empty trie backed by a fresh [`MemoryNodeDb`].
    pub fn in_memory() -> Self {
        Self::with_root(Arc::new(MemoryNodeDb::new()), EMPTY_ROOT)
    }

    fn with_root(db: Arc<dyn NodeDb>, root: B256) -> Self {
        let (root, _) = watch::channel(root);
        Self {
            inner: Arc::new(TrieInner {
                db,
                root,
                writer: Mutex::new(()),
            }),
        }
    }

    /// Current root hash; [`EMPTY_ROOT`] for an empty trie.
    pub fn root(&self) -> B256 {
        *self.inner.root.borrow()
    }

    /// Subscribe to root changes.
    pub fn subscribe(&self) -> watch::Receiver<B256> {
        self.inner.root.subscribe()
    }

    /// The backing node database.
    pub fn db(&self) -> &Arc<dyn NodeDb> {
        &self.inner.db
    }

    /// Insert or overwrite `key`, returning the new root.
    pub async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<B256> {
        if value.is_empty() {
            return Err(TrieError::EmptyValue);
        }
        let _guard = self.inner.writer.lock().await;
        self.write_locked(key, value).await
    }

    /// Insert `key` only if absent. Returns `false`, writing nothing, when
    /// the key is already present.
    pub async fn insert_new(&self, key: &[u8], value: Vec<u8>) -> Result<bool> {
        if value.is_empty() {
            return Err(TrieError::EmptyValue);
        }
        let _guard = self.inner.writer.lock().await;
        if self.get_at(self.root(), key).await?.is_some() {
            return Ok(false);
        }
        self.write_locked(key, value).await?;
        Ok(true)
    }

    /// Value stored under `key` at the current root.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_at(self.root(), key).await
    }

    /// Value stored under `key` at `root`.
    pub async fn get_at(&self, root: B256, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(mut node) = self.resolve_root(root).await? else {
            return Ok(None);
        };
        let path = to_nibbles(key);
        let mut rest = path.as_slice();

        loop {
            match node {
                TrieNode::Leaf { path, value } => {
                    return Ok((path == rest).then_some(value));
                }
                TrieNode::Extension { path, child } => {
                    if !rest.starts_with(&path) {
                        return Ok(None);
                    }
                    rest = &rest[path.len()..];
                    node = self.lookup_node(&child).await?;
                }
                TrieNode::Branch { children, value } => {
                    let Some((&nibble, tail)) = rest.split_first() else {
                        return Ok(value);
                    };
                    let Some(child) = &children[nibble as usize] else {
                        return Ok(None);
                    };
                    node = self.lookup_node(child).await?;
                    rest = tail;
                }
            }
        }
    }

    /// Resolve a reference to its decoded node.
    ///
    /// Fails with [`TrieError::CorruptNode`] when a hashed node is missing
    /// from the database, or when the encoding does not decode.
    pub async fn lookup_node(&self, reference: &NodeRef) -> Result<TrieNode> {
        match reference {
            NodeRef::Inline(raw) => TrieNode::decode(raw, reference),
            NodeRef::Hash(hash) => {
                let encoded = self
                    .inner
                    .db
                    .get_node(*hash)
                    .await?
                    .ok_or_else(|| TrieError::corrupt(reference, "node not found"))?;
                TrieNode::decode(&encoded, reference)
            }
        }
    }

    /// Stream every leaf at the current root in key order.
    pub fn leaves(&self) -> BoxStream<'static, Result<Leaf>> {
        self.leaves_at(self.root())
    }

    /// Stream every leaf under `root` in key order.
    ///
    /// The stream is lazy: nodes are fetched as it is polled. After the first
    /// error it ends.
    pub fn leaves_at(&self, root: B256) -> BoxStream<'static, Result<Leaf>> {
        let stack = if root == EMPTY_ROOT {
            Vec::new()
        } else {
            vec![Frame::Node(Vec::new(), NodeRef::Hash(root))]
        };

        stream::unfold((self.clone(), stack), |(trie, mut stack)| async move {
            loop {
                match stack.pop()? {
                    Frame::Emit(path, value) => {
                        return Some((Ok((from_nibbles(&path), value)), (trie, stack)));
                    }
                    Frame::Node(prefix, reference) => match trie.lookup_node(&reference).await {
                        Err(e) => {
                            stack.clear();
                            return Some((Err(e), (trie, stack)));
                        }
                        Ok(TrieNode::Leaf { path, value }) => {
                            let key = from_nibbles(&[prefix, path].concat());
                            return Some((Ok((key, value)), (trie, stack)));
                        }
                        Ok(TrieNode::Extension { path, child }) => {
                            stack.push(Frame::Node([prefix, path].concat(), child));
                        }
                        Ok(TrieNode::Branch { children, value }) => {
                            for (nibble, child) in children.into_iter().enumerate().rev() {
                                if let Some(child) = child {
                                    let mut path = prefix.clone();
                                    path.push(nibble as u8);
                                    stack.push(Frame::Node(path, child));
                                }
                            }
                            // a key ending at the branch sorts before its extensions
                            if let Some(value) = value {
                                stack.push(Frame::Emit(prefix, value));
                            }
                        }
                    },
                }
            }
        })
        .boxed()
    }

    async fn resolve_root(&self, root: B256) -> Result<Option<TrieNode>> {
        if root == EMPTY_ROOT {
            return Ok(None);
        }
        self.lookup_node(&NodeRef::Hash(root)).await.map(Some)
    }

    async fn write_locked(&self, key: &[u8], value: Vec<u8>) -> Result<B256> {
        let current = self.resolve_root(self.root()).await?;
        let mut batch = Batch::new();
        let node = self
            .insert_node(current, to_nibbles(key), value, &mut batch)
            .await?;

        // the root is always hashed, however short its encoding
        let encoded = node.encode();
        let root = keccak256(&encoded);
        batch.push((root, encoded));

        let written = batch.len();
        self.inner.db.commit(batch, root).await?;
        self.inner.root.send_replace(root);
        debug!(%root, nodes = written, "Committed trie write");
        Ok(root)
    }

    fn insert_node<'a>(
        &'a self,
        node: Option<TrieNode>,
        path: Vec<u8>,
        value: Vec<u8>,
        batch: &'a mut Batch,
    ) -> BoxFuture<'a, Result<TrieNode>> {
        Box::pin(async move {
            let Some(node) = node else {
                return Ok(TrieNode::Leaf { path, value });
            };

            match node {
                TrieNode::Leaf {
                    path: leaf_path,
                    value: leaf_value,
                } => {
                    if leaf_path == path {
                        return Ok(TrieNode::Leaf { path, value });
                    }
                    let shared = common_prefix(&leaf_path, &path);
                    let mut branch = TrieNode::empty_branch();
                    place(&mut branch, &leaf_path[shared..], leaf_value, batch);
                    place(&mut branch, &path[shared..], value, batch);
                    Ok(wrap_in_extension(&path[..shared], branch, batch))
                }

                TrieNode::Extension {
                    path: ext_path,
                    child,
                } => {
                    let shared = common_prefix(&ext_path, &path);
                    if shared == ext_path.len() {
                        let child_node = self.lookup_node(&child).await?;
                        let updated = self
                            .insert_node(Some(child_node), path[shared..].to_vec(), value, batch)
                            .await?;
                        let child = store(updated, batch);
                        return Ok(TrieNode::Extension {
                            path: ext_path,
                            child,
                        });
                    }

                    // split the extension at the first diverging nibble
                    let mut branch = TrieNode::empty_branch();
                    if let TrieNode::Branch { children, .. } = &mut branch {
                        let remainder = &ext_path[shared + 1..];
                        children[ext_path[shared] as usize] = Some(if remainder.is_empty() {
                            child
                        } else {
                            store(
                                TrieNode::Extension {
                                    path: remainder.to_vec(),
                                    child,
                                },
                                batch,
                            )
                        });
                    }
                    place(&mut branch, &path[shared..], value, batch);
                    Ok(wrap_in_extension(&path[..shared], branch, batch))
                }

                TrieNode::Branch {
                    mut children,
                    value: branch_value,
                } => {
                    let Some((&nibble, tail)) = path.split_first() else {
                        return Ok(TrieNode::Branch {
                            children,
                            value: Some(value),
                        });
                    };
                    let slot = nibble as usize;
                    let existing = match children[slot].take() {
                        Some(reference) => Some(self.lookup_node(&reference).await?),
                        None => None,
                    };
                    let updated = self
                        .insert_node(existing, tail.to_vec(), value, batch)
                        .await?;
                    children[slot] = Some(store(updated, batch));
                    Ok(TrieNode::Branch {
                        children,
                        value: branch_value,
                    })
                }
            }
        })
    }
}

/// Encode `node`, recording it in `batch` unless it is small enough to inline.
fn store(node: TrieNode, batch: &mut Batch) -> NodeRef {
    let encoded = node.encode();
    let reference = NodeRef::from_encoded(encoded.clone());
    if let NodeRef::Hash(hash) = &reference {
        batch.push((*hash, encoded));
    }
    reference
}

/// Put a value into a fresh branch at `path` relative to the branch.
fn place(branch: &mut TrieNode, path: &[u8], value: Vec<u8>, batch: &mut Batch) {
    if let TrieNode::Branch {
        children,
        value: slot,
    } = branch
    {
        match path.split_first() {
            None => *slot = Some(value),
            Some((&nibble, tail)) => {
                let leaf = TrieNode::Leaf {
                    path: tail.to_vec(),
                    value,
                };
                children[nibble as usize] = Some(store(leaf, batch));
            }
        }
    }
}

fn wrap_in_extension(shared: &[u8], branch: TrieNode, batch: &mut Batch) -> TrieNode {
    if shared.is_empty() {
        branch
    } else {
        TrieNode::Extension {
            path: shared.to_vec(),
            child: store(branch, batch),
        }
    }
}
