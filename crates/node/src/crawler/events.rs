//! Event definitions for the crawled contracts.

use alloy::primitives::{Address, B256};
use alloy::sol;
use thiserror::Error;

sol! {
    /// ERC-721 transfer; a mint has `from == 0`.
    #[derive(Debug, PartialEq, Eq)]
    event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);

    /// Delegation registry event. See [`DelegationPayload`] for the layout.
    #[derive(Debug, PartialEq, Eq)]
    event Delegate(bytes32[3] data);
}

/// Malformed `Delegate` payload.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PayloadError {
    /// Non-zero bytes where padding is expected.
    #[error("Delegate payload padding is not zero")]
    Padding,

    /// Recovery id outside 27/28 or 0/1.
    #[error("Delegate payload has invalid recovery id {0}")]
    RecoveryId(u8),
}

/// Decoded `Delegate(bytes32[3])` data.
///
/// ```text
/// data[0] = r
/// data[1] = s
/// data[2] = 0x00 * 10 | v (1) | flags (1) | delegate (20)
/// ```
///
/// Bit 0 of `flags` is the `authorize` bit. The `(r, s, v)` signature is the
/// delegate key's consent: an EIP-712 `Authorization(address from,bool
/// authorize)` with `from` set to the transaction sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationPayload {
    /// Key receiving or losing authority.
    pub delegate: Address,
    /// Grant or revoke.
    pub authorize: bool,
    /// 65-byte `r || s || v` signature.
    pub signature: [u8; 65],
}

impl DelegationPayload {
    /// Parse the three words of a `Delegate` event.
    pub fn parse(data: &[B256; 3]) -> Result<Self, PayloadError> {
        let packed = data[2].as_slice();
        if packed[..10].iter().any(|b| *b != 0) {
            return Err(PayloadError::Padding);
        }

        let v = packed[10];
        if !matches!(v, 0 | 1 | 27 | 28) {
            return Err(PayloadError::RecoveryId(v));
        }
        let authorize = packed[11] & 1 == 1;
        let delegate = Address::from_slice(&packed[12..]);

        let mut signature = [0u8; 65];
        signature[..32].copy_from_slice(data[0].as_slice());
        signature[32..64].copy_from_slice(data[1].as_slice());
        signature[64] = v;

        Ok(Self {
            delegate,
            authorize,
            signature,
        })
    }

    /// Pack into the three event words.
    pub fn encode(&self) -> [B256; 3] {
        let mut packed = [0u8; 32];
        packed[10] = self.signature[64];
        packed[11] = u8::from(self.authorize);
        packed[12..].copy_from_slice(self.delegate.as_slice());

        [
            B256::from_slice(&self.signature[..32]),
            B256::from_slice(&self.signature[32..64]),
            B256::from(packed),
        ]
    }
}
