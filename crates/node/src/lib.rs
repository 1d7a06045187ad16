//! The newsnet node: chain crawler, allowlist registry and message store.
//!
//! This crate provides:
//! - A generic crawler that turns contract events into ordered records
//! - The allowlist of token owners and their delegates
//! - The signed-message write path over a Merkle-Patricia trie
//! - Offline deduplication of the message trie
//! - An HTTP API
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  newsnet-node                                │
//! │                                              │
//! │  ┌──────────────────────┐                    │
//! │  │  Crawler (per path)  │ ← Ethereum RPC     │
//! │  │  coordinator tick    │   rate-limited     │
//! │  │  extract → decode    │   per endpoint     │
//! │  │  → load              │                    │
//! │  └─────────┬────────────┘                    │
//! │            │                                 │
//! │      ┌─────▼──────┐                          │
//! │      │  Storage   │ ← SQLite                 │
//! │      │  (paths)   │   checkpoints, records   │
//! │      └─────┬──────┘                          │
//! │            │ end hooks                       │
//! │      ┌─────▼──────┐                          │
//! │      │  Registry  │  owners + delegations    │
//! │      └─────┬──────┘                          │
//! │            │ is_allowed                      │
//! │      ┌─────▼────────┐     ┌──────────────┐   │
//! │      │ MessageStore │ ←── │  API (axum)  │   │
//! │      │   (trie)     │     └──────────────┘   │
//! │      └──────────────┘                        │
//! └──────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod crawler;
pub mod identity;
pub mod migration;
pub mod registry;
pub mod server;
pub mod storage;
pub mod writer;

pub use newsnet_core::{AccountRecord, DelegationRecord, MessageKey, SignedMessage};
