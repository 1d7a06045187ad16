//! Core types for newsnet.

use alloy_primitives::{uint, Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{
    MAX_HREF_LENGTH, MAX_TITLE_LENGTH, MESSAGE_KEY_LENGTH, MESSAGE_KINDS, SIGNATURE_LENGTH,
};
use crate::error::{CoreError, Result};
use crate::hashing::{keccak256, message_signing_hash};

/// Order of the secp256k1 group.
const SECP256K1_ORDER: U256 =
    uint!(0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141_U256);

/// A signed feed message (a submission or an upvote).
///
/// The `type` field is called `kind` in Rust and serialized under its wire
/// name. Once stored, a message is never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage {
    /// Headline, 1 to 80 characters.
    pub title: String,
    /// Target link, `http://` or `https://`.
    pub href: String,
    /// Message kind. Only `amplify` is accepted.
    #[serde(rename = "type")]
    pub kind: String,
    /// Unix seconds chosen by the signer.
    pub timestamp: u64,
    /// `0x`-prefixed hex EIP-712 signature.
    pub signature: String,
}

impl SignedMessage {
    /// Check the message schema.
    pub fn validate(&self) -> Result<()> {
        let title_len = self.title.chars().count();
        if title_len == 0 || title_len > MAX_TITLE_LENGTH {
            return Err(CoreError::InvalidMessage(format!(
                "title must be 1 to {MAX_TITLE_LENGTH} characters, got {title_len}"
            )));
        }

        if !(self.href.starts_with("https://") || self.href.starts_with("http://")) {
            return Err(CoreError::InvalidMessage(
                "href must be an http or https URI".to_string(),
            ));
        }
        if self.href.chars().count() > MAX_HREF_LENGTH {
            return Err(CoreError::InvalidMessage(format!(
                "href exceeds {MAX_HREF_LENGTH} characters"
            )));
        }

        if !MESSAGE_KINDS.contains(&self.kind.as_str()) {
            return Err(CoreError::InvalidMessage(format!(
                "unsupported message type: {}",
                self.kind
            )));
        }

        self.signature_bytes()?;
        Ok(())
    }

    /// Decode the hex signature.
    pub fn signature_bytes(&self) -> Result<Vec<u8>> {
        let stripped = self.signature.strip_prefix("0x").ok_or_else(|| {
            CoreError::InvalidSignatureEncoding("signature must start with 0x".to_string())
        })?;
        hex::decode(stripped).map_err(|e| CoreError::InvalidSignatureEncoding(e.to_string()))
    }

    /// The same message with its signature in canonical form: lowercase
    /// hex, low `s`, and `v` of 27 or 28.
    ///
    /// Every encoding of one signature normalizes to the same message, and
    /// so to the same [`MessageKey`].
    pub fn normalized(&self) -> Result<Self> {
        let mut raw = self.signature_bytes()?;
        if raw.len() != SIGNATURE_LENGTH {
            return Err(CoreError::InvalidSignatureEncoding(format!(
                "signature must be {SIGNATURE_LENGTH} bytes, got {}",
                raw.len()
            )));
        }

        let mut odd = match raw[64] {
            0 | 27 => false,
            1 | 28 => true,
            v => {
                return Err(CoreError::InvalidSignatureEncoding(format!(
                    "invalid recovery id {v}"
                )))
            }
        };

        let s = U256::from_be_slice(&raw[32..64]);
        if s >= SECP256K1_ORDER {
            return Err(CoreError::InvalidSignatureEncoding(
                "signature s is out of range".to_string(),
            ));
        }
        if s > SECP256K1_ORDER >> 1 {
            raw[32..64].copy_from_slice(&(SECP256K1_ORDER - s).to_be_bytes::<32>());
            odd = !odd;
        }
        raw[64] = 27 + u8::from(odd);

        Ok(Self {
            signature: format!("0x{}", hex::encode(raw)),
            ..self.clone()
        })
    }

    /// RFC 8785 canonical JSON of all five fields.
    pub fn canonical(&self) -> Result<Vec<u8>> {
        serde_jcs::to_vec(self).map_err(|e| CoreError::Canonicalization(e.to_string()))
    }

    /// Content identity: `keccak256(canonical)`.
    pub fn digest(&self) -> Result<B256> {
        Ok(keccak256(&self.canonical()?))
    }

    /// Trie key of this message.
    pub fn storage_key(&self) -> Result<MessageKey> {
        Ok(MessageKey::new(self.timestamp, self.digest()?))
    }

    /// The EIP-712 digest the author signed.
    pub fn signing_hash(&self) -> B256 {
        message_signing_hash(&self.title, &self.href, &self.kind, self.timestamp)
    }
}

/// Trie key of a message: `timestamp (8 bytes, big-endian) || digest`.
///
/// Byte order of keys equals chronological order of messages.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKey([u8; MESSAGE_KEY_LENGTH]);

impl MessageKey {
    /// Build a key from its parts.
    pub fn new(timestamp: u64, digest: B256) -> Self {
        let mut bytes = [0u8; MESSAGE_KEY_LENGTH];
        bytes[..8].copy_from_slice(&timestamp.to_be_bytes());
        bytes[8..].copy_from_slice(digest.as_slice());
        Self(bytes)
    }

    /// Parse a raw 40-byte key.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; MESSAGE_KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(array))
    }

    /// Parse a hex key, with or without `0x`.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))
            .map_err(|e| CoreError::Other(format!("invalid key hex: {e}")))?;
        Self::from_slice(&bytes)
    }

    /// Timestamp prefix.
    pub fn timestamp(&self) -> u64 {
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(ts)
    }

    /// Content digest suffix.
    pub fn digest(&self) -> B256 {
        B256::from_slice(&self.0[8..])
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageKey({self})")
    }
}

impl Serialize for MessageKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MessageKey {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Ownership record loaded from a token transfer or mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    /// Recipient of the token.
    pub owner: Address,
    /// Token id.
    pub token_id: U256,
    /// Block timestamp, zero unless the path enriches timestamps.
    pub timestamp: u64,
    /// Transaction value in wei, zero unless the path enriches values.
    pub value: U256,
}

/// A delegation grant or revocation loaded from a `Delegate` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationRecord {
    /// Account on whose behalf the delegate may write.
    pub delegator: Address,
    /// Key receiving (or losing) write authority.
    pub delegate: Address,
    /// Transaction sender.
    pub sender: Address,
    /// Block of the event.
    pub block_number: u64,
    /// Transaction index within the block.
    pub tx_index: u64,
    /// Log index within the block.
    pub log_index: u64,
    /// `true` grants, `false` revokes.
    pub authorize: bool,
}
