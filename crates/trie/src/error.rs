//! Error types for the trie crate.

use thiserror::Error;

/// Trie error type.
#[derive(Error, Debug)]
pub enum TrieError {
    /// A node reference could not be resolved or its encoding is malformed.
    #[error("Corrupt node {reference}: {reason}")]
    CorruptNode {
        /// Hash or inline encoding of the offending reference.
        reference: String,
        /// What went wrong.
        reason: String,
    },

    /// Values must be non-empty (an empty value encodes as an absent slot).
    #[error("Invalid leaf value: empty")]
    EmptyValue,

    /// The node database failed.
    #[error("Node database error: {0}")]
    Storage(String),

    /// A walk handler asked to stop.
    #[error("Walk aborted: {0}")]
    Aborted(String),

    /// Internal error (should not happen in correct usage).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrieError {
    pub(crate) fn corrupt(reference: impl ToString, reason: impl Into<String>) -> Self {
        TrieError::CorruptNode {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for TrieError.
pub type Result<T> = std::result::Result<T, TrieError>;
