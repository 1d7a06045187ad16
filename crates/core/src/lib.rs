//! # newsnet Core
//!
//! Core types, constants and hashing utilities for the newsnet feed.
//!
//! This crate provides the building blocks shared by the trie and node crates,
//! so that every component derives message identities and signing hashes the
//! same way.
//!
//! ## Features
//!
//! - **Ethereum Types**: Uses Alloy primitives for Address, B256, U256 and keccak256
//! - **Domain Types**: SignedMessage, MessageKey, AccountRecord, DelegationRecord
//! - **Constants**: EIP-712 domain parameters and message schema limits
//! - **Hashing**: Canonical digests and EIP-712 signing hashes

#![warn(missing_docs)]

pub mod constants;
pub mod error;
pub mod hashing;
pub mod types;

// Re-export commonly used items
pub use constants::*;
pub use error::{CoreError, Result};
pub use hashing::{keccak256, message_signing_hash};
pub use types::*;

// Re-export Alloy primitives for convenience
pub use alloy_primitives::{Address, B256, U256};
