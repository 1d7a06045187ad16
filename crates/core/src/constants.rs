//! Canonical constants for newsnet.
//!
//! Signing clients must use exactly these values, otherwise recovered signers
//! will not match.

/// EIP-712 domain name for feed messages.
pub const EIP712_DOMAIN_NAME: &str = "newsnet";

/// EIP-712 domain version shared by messages and delegation authorizations.
pub const EIP712_DOMAIN_VERSION: &str = "1.0.0";

/// Preimage of the domain salt: `salt = keccak256(DOMAIN_SALT_PREIMAGE)`.
pub const DOMAIN_SALT_PREIMAGE: &[u8] = b"newsnet domain separator salt";

/// EIP-712 domain name for delegation authorizations.
pub const DELEGATION_DOMAIN_NAME: &str = "newsnet-delegation";

/// EIP-712 type string of a feed message.
///
/// `type` is a reserved word in Solidity, so this struct cannot be declared
/// with `sol!` and is hashed by hand in [`crate::hashing`].
pub const MESSAGE_TYPE: &str = "Message(string title,string href,string type,uint256 timestamp)";

/// Maximum title length in characters.
pub const MAX_TITLE_LENGTH: usize = 80;

/// Maximum href length in characters.
pub const MAX_HREF_LENGTH: usize = 2048;

/// Accepted message kinds. Submissions and upvotes are both `amplify`.
pub const MESSAGE_KINDS: [&str; 1] = ["amplify"];

/// Length of a message storage key: 8-byte timestamp + 32-byte digest.
pub const MESSAGE_KEY_LENGTH: usize = 40;

/// Length of an `r || s || v` signature.
pub const SIGNATURE_LENGTH: usize = 65;
