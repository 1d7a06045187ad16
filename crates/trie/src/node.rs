//! Node types of the Merkle-Patricia trie and their RLP wire encoding.
//!
//! The encoding is Ethereum-compatible: leaves and extensions are two-item
//! lists with hex-prefix paths, branches are 17-item lists. A child whose
//! encoding is shorter than 32 bytes is embedded inline, any other child is
//! referenced by the keccak256 of its encoding.

use std::fmt;

use alloy_primitives::{hex, keccak256, B256};
use alloy_rlp::Header;

use crate::error::{Result, TrieError};
use crate::nibbles::{decode_hex_prefix, encode_hex_prefix};

/// Reference from a parent node (or the root pointer) to a child.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum NodeRef {
    /// Child stored in the node database under this hash.
    Hash(B256),
    /// Child embedded in its parent; holds the child's RLP encoding.
    Inline(Vec<u8>),
}

impl NodeRef {
    /// Reference a node by its encoding, inlining it when shorter than 32 bytes.
    pub fn from_encoded(encoded: Vec<u8>) -> Self {
        if encoded.len() < 32 {
            NodeRef::Inline(encoded)
        } else {
            NodeRef::Hash(keccak256(&encoded))
        }
    }

    /// The bytes this reference contributes to its parent's encoding.
    fn encoded(&self) -> Vec<u8> {
        match self {
            NodeRef::Hash(hash) => alloy_rlp::encode(hash.as_slice()),
            NodeRef::Inline(raw) => raw.clone(),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Hash(hash) => write!(f, "{hash}"),
            NodeRef::Inline(raw) => write!(f, "inline:0x{}", hex::encode(raw)),
        }
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeRef({self})")
    }
}

/// A decoded trie node.
///
/// Paths are nibble sequences relative to the node's position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrieNode {
    /// Terminal key suffix and value.
    Leaf {
        /// Remaining key nibbles.
        path: Vec<u8>,
        /// Stored value.
        value: Vec<u8>,
    },

    /// Shared key fragment leading to a single child.
    Extension {
        /// Shared nibbles.
        path: Vec<u8>,
        /// The child, always a branch in a canonical trie.
        child: NodeRef,
    },

    /// Sixteen-way fork indexed by the next nibble.
    Branch {
        /// Child per nibble.
        children: [Option<NodeRef>; 16],
        /// Value of a key ending exactly here.
        value: Option<Vec<u8>>,
    },
}

impl TrieNode {
    /// An empty branch.
    pub fn empty_branch() -> Self {
        TrieNode::Branch {
            children: std::array::from_fn(|_| None),
            value: None,
        }
    }

    /// References to this node's direct children, with the nibbles leading to each.
    pub fn children(&self) -> Vec<(Vec<u8>, NodeRef)> {
        match self {
            TrieNode::Leaf { .. } => Vec::new(),
            TrieNode::Extension { path, child } => vec![(path.clone(), child.clone())],
            TrieNode::Branch { children, .. } => children
                .iter()
                .enumerate()
                .filter_map(|(i, c)| c.as_ref().map(|c| (vec![i as u8], c.clone())))
                .collect(),
        }
    }

    /// RLP encoding of this node.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            TrieNode::Leaf { path, value } => encode_list(&[
                alloy_rlp::encode(encode_hex_prefix(path, true).as_slice()),
                alloy_rlp::encode(value.as_slice()),
            ]),
            TrieNode::Extension { path, child } => encode_list(&[
                alloy_rlp::encode(encode_hex_prefix(path, false).as_slice()),
                child.encoded(),
            ]),
            TrieNode::Branch { children, value } => {
                let mut items: Vec<Vec<u8>> = children
                    .iter()
                    .map(|c| match c {
                        Some(child) => child.encoded(),
                        None => vec![alloy_rlp::EMPTY_STRING_CODE],
                    })
                    .collect();
                let value = value.as_deref().unwrap_or_default();
                items.push(alloy_rlp::encode(value));
                encode_list(&items)
            }
        }
    }

    /// Decode a node from its RLP encoding.
    ///
    /// `reference` only labels the error.
    pub fn decode(encoded: &[u8], reference: &NodeRef) -> Result<Self> {
        let items = split_list(encoded).map_err(|reason| TrieError::corrupt(reference, reason))?;

        match items.len() {
            2 => {
                let first = &items[0];
                if first.list {
                    return Err(TrieError::corrupt(reference, "path item is a list"));
                }
                let (path, is_leaf) = decode_hex_prefix(first.payload)
                    .ok_or_else(|| TrieError::corrupt(reference, "bad hex-prefix path"))?;
                if is_leaf {
                    if items[1].list {
                        return Err(TrieError::corrupt(reference, "leaf value is a list"));
                    }
                    Ok(TrieNode::Leaf {
                        path,
                        value: items[1].payload.to_vec(),
                    })
                } else {
                    let child = decode_child(&items[1], reference)?
                        .ok_or_else(|| TrieError::corrupt(reference, "extension without child"))?;
                    Ok(TrieNode::Extension { path, child })
                }
            }
            17 => {
                let mut children: [Option<NodeRef>; 16] = std::array::from_fn(|_| None);
                for (slot, item) in children.iter_mut().zip(&items[..16]) {
                    *slot = decode_child(item, reference)?;
                }
                let value_item = &items[16];
                if value_item.list {
                    return Err(TrieError::corrupt(reference, "branch value is a list"));
                }
                let value = (!value_item.payload.is_empty()).then(|| value_item.payload.to_vec());
                Ok(TrieNode::Branch { children, value })
            }
            n => Err(TrieError::corrupt(
                reference,
                format!("expected 2 or 17 items, found {n}"),
            )),
        }
    }
}

/// One item of an RLP list.
struct RlpItem<'a> {
    /// Header and payload.
    raw: &'a [u8],
    payload: &'a [u8],
    list: bool,
}

fn decode_child(item: &RlpItem<'_>, reference: &NodeRef) -> Result<Option<NodeRef>> {
    if item.list {
        return Ok(Some(NodeRef::Inline(item.raw.to_vec())));
    }
    match item.payload.len() {
        0 => Ok(None),
        32 => Ok(Some(NodeRef::Hash(B256::from_slice(item.payload)))),
        n => Err(TrieError::corrupt(
            reference,
            format!("child reference of {n} bytes"),
        )),
    }
}

fn split_list(encoded: &[u8]) -> std::result::Result<Vec<RlpItem<'_>>, String> {
    let mut rest = encoded;
    let header = Header::decode(&mut rest).map_err(|e| e.to_string())?;
    if !header.list {
        return Err("node is not an RLP list".to_string());
    }
    if rest.len() != header.payload_length {
        return Err(format!(
            "list payload is {} bytes, header says {}",
            rest.len(),
            header.payload_length
        ));
    }

    let mut items = Vec::new();
    let mut cursor = rest;
    while !cursor.is_empty() {
        let start = cursor;
        let mut body = cursor;
        let item = Header::decode(&mut body).map_err(|e| e.to_string())?;
        if body.len() < item.payload_length {
            return Err("truncated list item".to_string());
        }
        let total = (start.len() - body.len()) + item.payload_length;
        items.push(RlpItem {
            raw: &start[..total],
            payload: &body[..item.payload_length],
            list: item.list,
        });
        cursor = &start[total..];
    }
    Ok(items)
}

fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_length = items.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(payload_length + 4);
    Header {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label() -> NodeRef {
        NodeRef::Hash(B256::ZERO)
    }

    #[test]
    fn test_leaf_encoding() {
        // ["0x20", "reindeer"]: hex-prefix of an empty leaf path plus the value
        let leaf = TrieNode::Leaf {
            path: vec![],
            value: b"reindeer".to_vec(),
        };
        let encoded = leaf.encode();
        assert_eq!(encoded[0], 0xc0 + 10);
        assert_eq!(encoded[1], 0x20);
        assert_eq!(encoded[2], 0x80 + 8);
        assert_eq!(&encoded[3..], b"reindeer");

        assert_eq!(TrieNode::decode(&encoded, &label()).unwrap(), leaf);
    }

    #[test]
    fn test_branch_with_inline_and_hashed_children() {
        let small = TrieNode::Leaf {
            path: vec![1],
            value: b"x".to_vec(),
        };
        let big = TrieNode::Leaf {
            path: vec![2, 3],
            value: vec![0xaa; 40],
        };
        let small_ref = NodeRef::from_encoded(small.encode());
        let big_ref = NodeRef::from_encoded(big.encode());
        assert!(matches!(small_ref, NodeRef::Inline(_)));
        assert!(matches!(big_ref, NodeRef::Hash(_)));

        let mut branch = TrieNode::empty_branch();
        if let TrieNode::Branch { children, value } = &mut branch {
            children[0] = Some(small_ref.clone());
            children[15] = Some(big_ref.clone());
            *value = Some(b"v".to_vec());
        }

        let decoded = TrieNode::decode(&branch.encode(), &label()).unwrap();
        assert_eq!(decoded, branch);
        assert_eq!(
            decoded.children(),
            vec![(vec![0], small_ref), (vec![15], big_ref)]
        );
    }

    #[test]
    fn test_extension_round_trip() {
        let ext = TrieNode::Extension {
            path: vec![6, 4, 6, 0xf, 6],
            child: NodeRef::Hash(B256::repeat_byte(0x11)),
        };
        assert_eq!(TrieNode::decode(&ext.encode(), &label()).unwrap(), ext);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        for bad in [
            vec![],
            vec![0x80],
            vec![0xc3, 0x01, 0x02, 0x03],
            vec![0xc5, 0x20],
            vec![0xc3, 0x82, 0x20],
        ] {
            let err = TrieNode::decode(&bad, &label()).unwrap_err();
            assert!(matches!(err, TrieError::CorruptNode { .. }), "{bad:?}");
        }
    }

    #[test]
    fn test_decode_rejects_short_hash_reference() {
        // extension whose child is a 3-byte string
        let encoded = encode_list(&[
            alloy_rlp::encode([0x00u8].as_slice()),
            alloy_rlp::encode([1u8, 2, 3].as_slice()),
        ]);
        assert!(matches!(
            TrieNode::decode(&encoded, &label()),
            Err(TrieError::CorruptNode { .. })
        ));
    }
}
