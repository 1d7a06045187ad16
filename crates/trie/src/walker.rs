//! Concurrent, depth-first-biased traversal of every node under a root.
//!
//! Pending node references sit in a priority queue ordered by the length of
//! the key path leading to them, deepest first, so memory stays proportional
//! to the frontier of the deepest subtrees rather than to a whole level. At
//! most `concurrency` lookups are in flight at any time.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use alloy_primitives::B256;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{Result, TrieError};
use crate::node::{NodeRef, TrieNode};
use crate::tree::Trie;
use crate::EMPTY_ROOT;

/// Default bound on in-flight node lookups.
pub const DEFAULT_WALK_CONCURRENCY: usize = 500;

/// A node handed to the walk handler.
#[derive(Debug, Clone)]
pub struct VisitedNode {
    /// Nibble path from the root to this node.
    pub path: Vec<u8>,
    /// How the parent referenced this node.
    pub reference: NodeRef,
    /// The decoded node.
    pub node: TrieNode,
}

/// Totals of a completed walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    /// Nodes visited.
    pub nodes: u64,
    /// Stored values seen (leaves plus branch values).
    pub values: u64,
    /// Nodes that were embedded in their parent.
    pub inline_nodes: u64,
    /// Longest nibble path reached.
    pub max_depth: usize,
}

struct Pending {
    depth: usize,
    seq: u64,
    path: Vec<u8>,
    reference: NodeRef,
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        // deeper first, then FIFO among equals
        self.depth
            .cmp(&other.depth)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

/// Visits every node reachable from a root exactly once.
#[derive(Clone)]
pub struct TrieWalker {
    trie: Trie,
    concurrency: usize,
}

impl TrieWalker {
    /// Create a walker bounded to `concurrency` in-flight lookups (at least one).
    pub fn new(trie: Trie, concurrency: usize) -> Self {
        Self {
            trie,
            concurrency: concurrency.max(1),
        }
    }

    /// The lookup bound.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Walk the subtree under `root`, calling `on_node` once per node.
    ///
    /// Returns after every node has been handled, or with the first lookup
    /// or handler error. On error all in-flight lookups are cancelled.
    pub async fn walk<F>(&self, root: B256, mut on_node: F) -> Result<WalkStats>
    where
        F: FnMut(&VisitedNode) -> Result<()>,
    {
        let mut stats = WalkStats::default();
        if root == EMPTY_ROOT {
            return Ok(stats);
        }

        let mut queue = BinaryHeap::new();
        let mut seen: HashSet<Vec<u8>> = HashSet::new();
        let mut in_flight: JoinSet<(Vec<u8>, NodeRef, Result<TrieNode>)> = JoinSet::new();
        let mut seq = 0u64;

        queue.push(Pending {
            depth: 0,
            seq,
            path: Vec::new(),
            reference: NodeRef::Hash(root),
        });

        loop {
            while in_flight.len() < self.concurrency {
                let Some(next) = queue.pop() else {
                    break;
                };
                if !seen.insert(next.path.clone()) {
                    continue;
                }
                let trie = self.trie.clone();
                in_flight.spawn(async move {
                    let node = trie.lookup_node(&next.reference).await;
                    (next.path, next.reference, node)
                });
            }

            // queue drained and nothing in flight: done
            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            let (path, reference, node) = match joined {
                Ok(done) => done,
                Err(e) => {
                    in_flight.abort_all();
                    return Err(TrieError::Internal(format!("lookup task failed: {e}")));
                }
            };
            let node = match node {
                Ok(node) => node,
                Err(e) => {
                    warn!(error = %e, "Walk aborted on node lookup");
                    in_flight.abort_all();
                    return Err(e);
                }
            };

            for (fragment, child) in node.children() {
                seq += 1;
                let child_path = [path.as_slice(), fragment.as_slice()].concat();
                queue.push(Pending {
                    depth: child_path.len(),
                    seq,
                    path: child_path,
                    reference: child,
                });
            }

            stats.nodes += 1;
            stats.max_depth = stats.max_depth.max(path.len());
            if matches!(reference, NodeRef::Inline(_)) {
                stats.inline_nodes += 1;
            }
            match &node {
                TrieNode::Leaf { .. } | TrieNode::Branch { value: Some(_), .. } => {
                    stats.values += 1
                }
                _ => {}
            }

            let visited = VisitedNode {
                path,
                reference,
                node,
            };
            if let Err(e) = on_node(&visited) {
                in_flight.abort_all();
                return Err(e);
            }
        }

        debug!(
            nodes = stats.nodes,
            values = stats.values,
            max_depth = stats.max_depth,
            "Walk complete"
        );
        Ok(stats)
    }
}
