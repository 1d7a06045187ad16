//! Merkle-Patricia trie for newsnet.
//!
//! This crate provides:
//! - An Ethereum-compatible Merkle-Patricia trie over a pluggable async node database
//! - The RLP node codec
//! - A bounded-concurrency walker that visits every node once
//! - An ordered, lazy leaf stream

#![warn(missing_docs)]

pub mod db;
pub mod error;
pub mod nibbles;
pub mod node;
pub mod tree;
pub mod walker;

use alloy_primitives::{b256, B256};

pub use db::{MemoryNodeDb, NodeDb};
pub use error::{Result, TrieError};
pub use node::{NodeRef, TrieNode};
pub use tree::{Leaf, Trie};
pub use walker::{TrieWalker, VisitedNode, WalkStats, DEFAULT_WALK_CONCURRENCY};

/// Root of the empty trie: `keccak256(rlp(""))`.
pub const EMPTY_ROOT: B256 =
    b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");
