//! Signer recovery for messages and delegation consents.

use alloy::primitives::{Address, PrimitiveSignature, B256};
use newsnet_core::hashing::authorization_signing_hash;
use newsnet_core::SignedMessage;
use thiserror::Error;

/// Why a signature was not accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Malformed or non-recoverable signature.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Recovered a different signer than the one claimed.
    #[error("Signature recovers {recovered}, not {claimed}")]
    SignerMismatch {
        /// Signer named by the caller
        claimed: Address,
        /// Signer the signature recovers to
        recovered: Address,
    },
}

/// Recovers signers of typed-data signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl IdentityResolver {
    /// Create a resolver.
    pub fn new() -> Self {
        Self
    }

    /// Recover the author of `message` from its EIP-712 signature.
    pub fn recover_signer(&self, message: &SignedMessage) -> Result<Address, IdentityError> {
        let raw = message
            .signature_bytes()
            .map_err(|e| IdentityError::InvalidSignature(e.to_string()))?;
        recover(&raw, &message.signing_hash())
    }

    /// Recover the author and require it to be `claimed`.
    pub fn verify_claimed(
        &self,
        message: &SignedMessage,
        claimed: Address,
    ) -> Result<Address, IdentityError> {
        let recovered = self.recover_signer(message)?;
        if recovered != claimed {
            return Err(IdentityError::SignerMismatch { claimed, recovered });
        }
        Ok(recovered)
    }

    /// Check a delegation consent: `delegate` signed
    /// `Authorization { from: sender, authorize }`.
    pub fn verify_authorization(
        &self,
        sender: Address,
        delegate: Address,
        authorize: bool,
        signature: &[u8],
    ) -> Result<(), IdentityError> {
        let recovered = recover(signature, &authorization_signing_hash(sender, authorize))?;
        if recovered != delegate {
            return Err(IdentityError::SignerMismatch {
                claimed: delegate,
                recovered,
            });
        }
        Ok(())
    }
}

fn recover(raw: &[u8], prehash: &B256) -> Result<Address, IdentityError> {
    let signature = PrimitiveSignature::from_raw(raw)
        .map_err(|e| IdentityError::InvalidSignature(e.to_string()))?;
    signature
        .recover_address_from_prehash(prehash)
        .map_err(|e| IdentityError::InvalidSignature(e.to_string()))
}
