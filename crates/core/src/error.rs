//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Message failed schema validation.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Signature string could not be decoded into bytes.
    #[error("Invalid signature encoding: {0}")]
    InvalidSignatureEncoding(String),

    /// Storage key had the wrong length.
    #[error("Invalid message key length: {0} (expected 40 bytes)")]
    InvalidKeyLength(usize),

    /// Canonical JSON encoding failed.
    #[error("Canonicalization failed: {0}")]
    Canonicalization(String),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
