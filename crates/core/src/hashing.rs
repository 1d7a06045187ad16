//! Hashing utilities for newsnet.
//!
//! Provides keccak256 hashing plus the EIP-712 signing hashes for feed
//! messages and delegation authorizations. Wallets produce the signatures, so
//! these functions must agree byte for byte with `eth_signTypedData_v4`.

use std::borrow::Cow;

use alloy_primitives::{keccak256 as alloy_keccak256, Address, B256, U256};
use alloy_sol_types::{sol, Eip712Domain, SolStruct};

use crate::constants::{
    DELEGATION_DOMAIN_NAME, DOMAIN_SALT_PREIMAGE, EIP712_DOMAIN_NAME, EIP712_DOMAIN_VERSION,
    MESSAGE_TYPE,
};

sol! {
    /// Consent a delegate key gives before an owner may register it on-chain.
    #[derive(Debug, PartialEq, Eq)]
    struct Authorization {
        address from;
        bool authorize;
    }
}

/// Compute keccak256 hash of input data.
///
/// This is a re-export of Alloy's keccak256 for convenience.
///
/// # Example
///
/// ```
/// use newsnet_core::hashing::keccak256;
///
/// let hash = keccak256(b"hello");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn keccak256(data: &[u8]) -> B256 {
    alloy_keccak256(data)
}

/// The domain salt: `keccak256("newsnet domain separator salt")`.
pub fn domain_salt() -> B256 {
    keccak256(DOMAIN_SALT_PREIMAGE)
}

/// EIP-712 domain for feed messages.
pub fn message_domain() -> Eip712Domain {
    Eip712Domain::new(
        Some(Cow::Borrowed(EIP712_DOMAIN_NAME)),
        Some(Cow::Borrowed(EIP712_DOMAIN_VERSION)),
        None,
        None,
        Some(domain_salt()),
    )
}

/// EIP-712 domain for delegation authorizations.
pub fn delegation_domain() -> Eip712Domain {
    Eip712Domain::new(
        Some(Cow::Borrowed(DELEGATION_DOMAIN_NAME)),
        Some(Cow::Borrowed(EIP712_DOMAIN_VERSION)),
        None,
        None,
        Some(domain_salt()),
    )
}

/// `hashStruct` of a feed message.
///
/// Dynamic `string` members are encoded as the keccak256 of their UTF-8
/// bytes and `timestamp` as a 32-byte big-endian word.
pub fn message_struct_hash(title: &str, href: &str, kind: &str, timestamp: u64) -> B256 {
    let mut data = Vec::with_capacity(32 * 5);
    data.extend_from_slice(keccak256(MESSAGE_TYPE.as_bytes()).as_slice());
    data.extend_from_slice(keccak256(title.as_bytes()).as_slice());
    data.extend_from_slice(keccak256(href.as_bytes()).as_slice());
    data.extend_from_slice(keccak256(kind.as_bytes()).as_slice());
    data.extend_from_slice(&U256::from(timestamp).to_be_bytes::<32>());
    keccak256(&data)
}

/// The digest a wallet signs for a feed message:
/// `keccak256(0x19 || 0x01 || domainSeparator || hashStruct(message))`.
pub fn message_signing_hash(title: &str, href: &str, kind: &str, timestamp: u64) -> B256 {
    let mut data = Vec::with_capacity(2 + 32 + 32);
    data.extend_from_slice(&[0x19, 0x01]);
    data.extend_from_slice(message_domain().separator().as_slice());
    data.extend_from_slice(message_struct_hash(title, href, kind, timestamp).as_slice());
    keccak256(&data)
}

/// The digest a delegate key signs to consent to (or withdraw from) acting
/// for `from`.
pub fn authorization_signing_hash(from: Address, authorize: bool) -> B256 {
    Authorization { from, authorize }.eip712_signing_hash(&delegation_domain())
}
