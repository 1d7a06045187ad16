//! The message write path.
//!
//! A submission is accepted only if it passes, in order: schema validation,
//! signature normalization, signer verification, the allowlist, and
//! duplicate-key rejection. Rejections are outcomes, not errors. Errors are
//! reserved for trie failures.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use futures::TryStreamExt;
use newsnet_core::{CoreError, MessageKey, SignedMessage};
use newsnet_trie::Trie;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::identity::{IdentityError, IdentityResolver};
use crate::registry::Registry;

/// Why a submission was not stored.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The same message is already stored.
    #[error("Message already stored")]
    DuplicateKey,

    /// Signature is malformed or does not recover the claimed signer.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// The signer is neither a token owner nor an owner's delegate.
    #[error("Signer {0} is not allowed to write")]
    NotAllowed(Address),

    /// Schema violation.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

/// Result of [`MessageStore::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Stored under `key`.
    Accepted {
        /// Trie key of the message
        key: MessageKey,
        /// Verified author
        signer: Address,
    },
    /// Not stored.
    Rejected(Rejection),
}

impl WriteOutcome {
    /// Whether the message was stored.
    pub fn is_accepted(&self) -> bool {
        matches!(self, WriteOutcome::Accepted { .. })
    }
}

/// A stored message with its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    /// Trie key
    pub key: MessageKey,
    /// The message as submitted
    #[serde(flatten)]
    pub message: SignedMessage,
}

/// Signed messages in a trie, guarded by the allowlist.
#[derive(Clone)]
pub struct MessageStore {
    trie: Trie,
    registry: Registry,
    identity: IdentityResolver,
}

impl MessageStore {
    /// Create a store writing into `trie`.
    pub fn new(trie: Trie, registry: Registry) -> Self {
        Self {
            trie,
            registry,
            identity: IdentityResolver::new(),
        }
    }

    /// The underlying trie.
    pub fn trie(&self) -> &Trie {
        &self.trie
    }

    /// Validate and store `message` as authored by `signer`.
    ///
    /// The signature must recover exactly `signer`. A corrupted signature
    /// that recovers some other address is [`Rejection::InvalidSignature`],
    /// never [`Rejection::NotAllowed`]. The message is stored with its
    /// signature normalized, so re-encodings of one signature collide.
    pub async fn submit(&self, message: &SignedMessage, signer: Address) -> Result<WriteOutcome> {
        if let Err(e) = message.validate() {
            return Ok(WriteOutcome::Rejected(rejection_of(e)));
        }
        let message = match message.normalized() {
            Ok(message) => message,
            Err(e) => return Ok(WriteOutcome::Rejected(rejection_of(e))),
        };

        match self.identity.verify_claimed(&message, signer) {
            Ok(_) => {}
            Err(IdentityError::InvalidSignature(reason)) => {
                return Ok(WriteOutcome::Rejected(Rejection::InvalidSignature(reason)))
            }
            Err(e @ IdentityError::SignerMismatch { .. }) => {
                return Ok(WriteOutcome::Rejected(Rejection::InvalidSignature(
                    e.to_string(),
                )))
            }
        }

        if !self.registry.is_allowed(signer) {
            debug!(%signer, "Rejected message from signer outside the allowlist");
            return Ok(WriteOutcome::Rejected(Rejection::NotAllowed(signer)));
        }

        let entry = message
            .storage_key()
            .and_then(|key| Ok((key, message.canonical()?)));
        let (key, value) = match entry {
            Ok(entry) => entry,
            Err(e) => return Ok(WriteOutcome::Rejected(rejection_of(e))),
        };

        let inserted = self
            .trie
            .insert_new(key.as_bytes(), value)
            .await
            .with_context(|| format!("Failed to store message {}", key))?;
        if !inserted {
            debug!(%key, "Duplicate message");
            return Ok(WriteOutcome::Rejected(Rejection::DuplicateKey));
        }

        info!(%key, %signer, "Stored message");
        Ok(WriteOutcome::Accepted { key, signer })
    }

    /// Look up a message by key.
    pub async fn get(&self, key: &MessageKey) -> Result<Option<SignedMessage>> {
        let Some(raw) = self
            .trie
            .get(key.as_bytes())
            .await
            .with_context(|| format!("Failed to read message {}", key))?
        else {
            return Ok(None);
        };
        let message = serde_json::from_slice(&raw)
            .with_context(|| format!("Stored message {} is not valid JSON", key))?;
        Ok(Some(message))
    }

    /// Up to `amount` messages with `timestamp >= from`, oldest first.
    pub async fn page(&self, from: u64, amount: usize) -> Result<Vec<StoredMessage>> {
        let mut page = Vec::with_capacity(amount.min(1024));
        if amount == 0 {
            return Ok(page);
        }

        let mut leaves = self.trie.leaves();
        while let Some((raw_key, raw_value)) = leaves.try_next().await? {
            let key = MessageKey::from_slice(&raw_key)
                .with_context(|| format!("Invalid message key 0x{}", hex::encode(&raw_key)))?;
            if key.timestamp() < from {
                continue;
            }
            let message = serde_json::from_slice(&raw_value)
                .with_context(|| format!("Stored message {} is not valid JSON", key))?;
            page.push(StoredMessage { key, message });
            if page.len() == amount {
                break;
            }
        }
        Ok(page)
    }
}

fn rejection_of(error: CoreError) -> Rejection {
    match error {
        CoreError::InvalidSignatureEncoding(reason) => Rejection::InvalidSignature(reason),
        CoreError::InvalidMessage(reason) => Rejection::InvalidMessage(reason),
        other => Rejection::InvalidMessage(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::test_keys;
    use alloy::primitives::U256;
    use newsnet_core::AccountRecord;

    fn store_allowing(owners: &[Address]) -> MessageStore {
        let accounts: Vec<AccountRecord> = owners
            .iter()
            .enumerate()
            .map(|(i, owner)| AccountRecord {
                owner: *owner,
                token_id: U256::from(i),
                timestamp: 0,
                value: U256::ZERO,
            })
            .collect();
        MessageStore::new(Trie::in_memory(), Registry::from_records(&accounts, &[]))
    }

    #[tokio::test]
    async fn test_accepts_owner_message() {
        let key = test_keys::key(1);
        let signer = test_keys::address(&key);
        let store = store_allowing(&[signer]);
        let message = test_keys::signed_message(&key, "Hello", 1_700_000_000);

        let outcome = store.submit(&message, signer).await.unwrap();
        let WriteOutcome::Accepted { key: stored, signer: author } = outcome else {
            panic!("expected acceptance, got {:?}", outcome);
        };
        assert_eq!(author, signer);

        let normalized = message.normalized().unwrap();
        assert_eq!(stored, normalized.storage_key().unwrap());
        assert_eq!(store.get(&stored).await.unwrap(), Some(normalized));
    }

    #[tokio::test]
    async fn test_duplicate_is_rejected() {
        let key = test_keys::key(1);
        let signer = test_keys::address(&key);
        let store = store_allowing(&[signer]);
        let message = test_keys::signed_message(&key, "Hello", 1_700_000_000);

        assert!(store.submit(&message, signer).await.unwrap().is_accepted());
        let root = store.trie().root();

        let outcome = store.submit(&message, signer).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Rejected(Rejection::DuplicateKey));
        assert_eq!(store.trie().root(), root);
    }

    #[tokio::test]
    async fn test_reencoded_signature_is_a_duplicate() {
        let key = test_keys::key(1);
        let signer = test_keys::address(&key);
        let store = store_allowing(&[signer]);
        let message = test_keys::signed_message(&key, "Hello", 1_700_000_000);
        assert!(store.submit(&message, signer).await.unwrap().is_accepted());

        let raw = message.normalized().unwrap().signature_bytes().unwrap();

        // v as 0/1 instead of 27/28
        let mut zero_based = raw.clone();
        zero_based[64] -= 27;

        // high-s twin: s' = n - s with the parity flipped
        let order = U256::from_str_radix(
            "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141",
            16,
        )
        .unwrap();
        let s = U256::from_be_slice(&raw[32..64]);
        let mut high_s = raw.clone();
        high_s[32..64].copy_from_slice(&(order - s).to_be_bytes::<32>());
        high_s[64] = if raw[64] == 27 { 28 } else { 27 };

        for variant in [zero_based, high_s] {
            let mut twin = message.clone();
            twin.signature = format!("0x{}", hex::encode(&variant));
            assert_ne!(twin.signature, message.signature);
            assert_eq!(
                store.submit(&twin, signer).await.unwrap(),
                WriteOutcome::Rejected(Rejection::DuplicateKey)
            );
        }
    }

    #[tokio::test]
    async fn test_every_flipped_signature_byte_is_invalid() {
        let key = test_keys::key(1);
        let signer = test_keys::address(&key);
        let store = store_allowing(&[signer]);
        let message = test_keys::signed_message(&key, "Flip me", 1_700_000_000);
        let raw = message.signature_bytes().unwrap();

        for position in 0..64 {
            let mut flipped = raw.clone();
            flipped[position] ^= 0x01;
            let mut tampered = message.clone();
            tampered.signature = format!("0x{}", hex::encode(&flipped));

            let outcome = store.submit(&tampered, signer).await.unwrap();
            assert!(
                matches!(outcome, WriteOutcome::Rejected(Rejection::InvalidSignature(_))),
                "byte {}: {:?}",
                position,
                outcome
            );
        }
        assert_eq!(store.trie().root(), newsnet_trie::EMPTY_ROOT);
        assert!(store.submit(&message, signer).await.unwrap().is_accepted());
    }

    #[tokio::test]
    async fn test_outsider_is_not_allowed() {
        let store = store_allowing(&[test_keys::address(&test_keys::key(1))]);
        let outsider = test_keys::key(2);
        let message = test_keys::signed_message(&outsider, "Hello", 1);

        let outcome = store
            .submit(&message, test_keys::address(&outsider))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WriteOutcome::Rejected(Rejection::NotAllowed(test_keys::address(&outsider)))
        );
    }

    #[tokio::test]
    async fn test_claimed_signer_must_match() {
        let key = test_keys::key(1);
        let owner = test_keys::address(&key);
        let other = test_keys::address(&test_keys::key(2));
        let store = store_allowing(&[owner, other]);
        let message = test_keys::signed_message(&key, "Hello", 1);

        // claiming an allowed address is not enough
        let outcome = store.submit(&message, other).await.unwrap();
        assert!(matches!(
            outcome,
            WriteOutcome::Rejected(Rejection::InvalidSignature(_))
        ));

        assert!(store.submit(&message, owner).await.unwrap().is_accepted());
    }

    #[tokio::test]
    async fn test_schema_violations() {
        let key = test_keys::key(1);
        let signer = test_keys::address(&key);
        let store = store_allowing(&[signer]);

        let mut message = test_keys::signed_message(&key, "Hello", 1);
        message.title = String::new();
        assert!(matches!(
            store.submit(&message, signer).await.unwrap(),
            WriteOutcome::Rejected(Rejection::InvalidMessage(_))
        ));

        let mut message = test_keys::signed_message(&key, "Hello", 1);
        message.signature = "deadbeef".to_string();
        assert!(matches!(
            store.submit(&message, signer).await.unwrap(),
            WriteOutcome::Rejected(Rejection::InvalidSignature(_))
        ));

        let mut message = test_keys::signed_message(&key, "Hello", 1);
        message.signature = format!("0x{}", "11".repeat(64));
        assert!(matches!(
            store.submit(&message, signer).await.unwrap(),
            WriteOutcome::Rejected(Rejection::InvalidSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_page_in_time_order() {
        let key = test_keys::key(1);
        let signer = test_keys::address(&key);
        let store = store_allowing(&[signer]);
        for (title, ts) in [("c", 30), ("a", 10), ("b", 20)] {
            let message = test_keys::signed_message(&key, title, ts);
            assert!(store.submit(&message, signer).await.unwrap().is_accepted());
        }

        let titles = |page: Vec<StoredMessage>| -> Vec<String> {
            page.into_iter().map(|m| m.message.title).collect()
        };
        assert_eq!(titles(store.page(0, 10).await.unwrap()), ["a", "b", "c"]);
        assert_eq!(titles(store.page(15, 10).await.unwrap()), ["b", "c"]);
        assert_eq!(titles(store.page(0, 2).await.unwrap()), ["a", "b"]);
        assert!(store.page(0, 0).await.unwrap().is_empty());
    }
}
