//! Record derivation from decoded logs.

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, B256, U256};
use newsnet_core::{AccountRecord, DelegationRecord};
use serde_json::{json, Value};
use thiserror::Error;

use super::events::{DelegationPayload, PayloadError};
use super::ordering;
use super::transformer::{DecodeError, DecodedLog};
use crate::config::{LoaderModule, OrderKey};
use crate::identity::{IdentityError, IdentityResolver};

/// Why a decoded log produced no record. The log is skipped.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Decoded values have the wrong shape.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Malformed delegation data.
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// Delegations need the transaction sender.
    #[error("Log was not enriched with its transaction sender")]
    MissingSender,

    /// The delegate did not sign the consent.
    #[error("Delegation consent rejected: {0}")]
    Consent(#[from] IdentityError),

    /// Record could not be encoded.
    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A record ready to append to the path's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedRecord {
    /// Ordering key
    pub key: String,
    /// JSON record
    pub value: String,
}

/// Turns decoded logs into ordered records.
#[derive(Debug, Clone)]
pub struct Loader {
    module: LoaderModule,
    order: OrderKey,
    identity: IdentityResolver,
}

impl Loader {
    /// Create a loader for a path.
    pub fn new(module: LoaderModule, order: OrderKey) -> Self {
        Self {
            module,
            order,
            identity: IdentityResolver::new(),
        }
    }

    /// Record type produced.
    pub fn module(&self) -> LoaderModule {
        self.module
    }

    /// Derive the `(key, record)` of `decoded`.
    pub fn load(&self, decoded: &DecodedLog) -> Result<LoadedRecord, LoadError> {
        let log = &decoded.log;
        let key = ordering::key_for(
            self.order,
            log.block_number,
            log.transaction_index,
            log.log_index,
        );

        let value = match self.module {
            LoaderModule::Accounts => serde_json::to_string(&self.account(decoded)?)?,
            LoaderModule::Delegations => serde_json::to_string(&self.delegation(decoded)?)?,
            LoaderModule::Logs => serde_json::to_string(&log_record(decoded))?,
        };

        Ok(LoadedRecord { key, value })
    }

    fn account(&self, decoded: &DecodedLog) -> Result<AccountRecord, LoadError> {
        Ok(AccountRecord {
            owner: address_field(decoded, "to")?,
            token_id: uint_field(decoded, "tokenId")?,
            timestamp: decoded.log.block_timestamp.unwrap_or(0),
            value: decoded.log.value.unwrap_or(U256::ZERO),
        })
    }

    fn delegation(&self, decoded: &DecodedLog) -> Result<DelegationRecord, LoadError> {
        let words = words_field(decoded, "data")?;
        let payload = DelegationPayload::parse(&words)?;
        let sender = decoded.log.sender.ok_or(LoadError::MissingSender)?;

        self.identity.verify_authorization(
            sender,
            payload.delegate,
            payload.authorize,
            &payload.signature,
        )?;

        Ok(DelegationRecord {
            delegator: sender,
            delegate: payload.delegate,
            sender,
            block_number: decoded.log.block_number,
            tx_index: decoded.log.transaction_index,
            log_index: decoded.log.log_index,
            authorize: payload.authorize,
        })
    }
}

fn log_record(decoded: &DecodedLog) -> Value {
    let log = &decoded.log;
    let mut record = json!({
        "address": log.address,
        "blockNumber": log.block_number,
        "transactionIndex": log.transaction_index,
        "logIndex": log.log_index,
        "transactionHash": log.transaction_hash,
        "values": decoded.values_json(),
    });
    if let Some(object) = record.as_object_mut() {
        if let Some(sender) = log.sender {
            object.insert("sender".to_string(), json!(sender));
        }
        if let Some(timestamp) = log.block_timestamp {
            object.insert("timestamp".to_string(), json!(timestamp));
        }
        if let Some(value) = log.value {
            object.insert("value".to_string(), json!(value.to_string()));
        }
    }
    record
}

fn address_field(decoded: &DecodedLog, name: &str) -> Result<Address, DecodeError> {
    match decoded.get(name) {
        Some(DynSolValue::Address(address)) => Ok(*address),
        _ => Err(field_error(name, "address")),
    }
}

fn uint_field(decoded: &DecodedLog, name: &str) -> Result<U256, DecodeError> {
    match decoded.get(name) {
        Some(DynSolValue::Uint(value, _)) => Ok(*value),
        _ => Err(field_error(name, "uint")),
    }
}

fn words_field(decoded: &DecodedLog, name: &str) -> Result<[B256; 3], DecodeError> {
    let Some(DynSolValue::FixedArray(items)) = decoded.get(name) else {
        return Err(field_error(name, "bytes32[3]"));
    };
    let mut words = [B256::ZERO; 3];
    if items.len() != words.len() {
        return Err(field_error(name, "bytes32[3]"));
    }
    for (word, item) in words.iter_mut().zip(items) {
        match item {
            DynSolValue::FixedBytes(value, 32) => *word = *value,
            _ => return Err(field_error(name, "bytes32[3]")),
        }
    }
    Ok(words)
}

fn field_error(name: &str, expected: &'static str) -> DecodeError {
    DecodeError::Field {
        name: name.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AbiInput;
    use crate::crawler::events::{Delegate, Transfer};
    use crate::crawler::source::RawLog;
    use crate::crawler::transformer::Transformer;
    use crate::identity::test_keys;
    use alloy::primitives::Bytes;
    use alloy::sol_types::{SolEvent, SolValue};
    use newsnet_core::hashing::authorization_signing_hash;

    fn raw(topics: Vec<B256>, data: Vec<u8>, block: u64, tx: u64, log: u64) -> RawLog {
        RawLog {
            address: Address::repeat_byte(0xee),
            topics,
            data: Bytes::from(data),
            block_number: block,
            transaction_index: tx,
            log_index: log,
            transaction_hash: B256::repeat_byte(0x01),
            sender: None,
            block_timestamp: None,
            value: None,
        }
    }

    fn decode(module: LoaderModule, log: &RawLog) -> DecodedLog {
        Transformer::new(&module.default_inputs())
            .unwrap()
            .decode(log)
            .unwrap()
    }

    fn transfer(to: Address, token: u64, block: u64, tx: u64) -> RawLog {
        raw(
            vec![
                Transfer::SIGNATURE_HASH,
                B256::ZERO,
                to.into_word(),
                B256::from(U256::from(token)),
            ],
            vec![],
            block,
            tx,
            0,
        )
    }

    #[test]
    fn test_account_record() {
        let owner = Address::repeat_byte(0x42);
        let mut log = transfer(owner, 9, 101, 2);
        log.block_timestamp = Some(1_680_000_000);

        let loader = Loader::new(LoaderModule::Accounts, OrderKey::BlockTx);
        let record = loader.load(&decode(LoaderModule::Accounts, &log)).unwrap();

        assert_eq!(record.key, "00000000000000650000000000000002");
        let account: AccountRecord = serde_json::from_str(&record.value).unwrap();
        assert_eq!(account.owner, owner);
        assert_eq!(account.token_id, U256::from(9));
        assert_eq!(account.timestamp, 1_680_000_000);
        assert_eq!(account.value, U256::ZERO);
    }

    fn delegation_log(authorize: bool, signer_matches: bool) -> (RawLog, Address, Address) {
        let delegate_key = test_keys::key(9);
        let delegate = test_keys::address(&delegate_key);
        let sender = test_keys::address(&test_keys::key(3));

        let consent_key = if signer_matches {
            delegate_key
        } else {
            test_keys::key(10)
        };
        let signature =
            test_keys::sign(&consent_key, &authorization_signing_hash(sender, authorize));
        let payload = DelegationPayload {
            delegate,
            authorize,
            signature,
        };

        let mut log = raw(
            vec![Delegate::SIGNATURE_HASH],
            payload.encode().abi_encode(),
            200,
            1,
            4,
        );
        log.sender = Some(sender);
        (log, sender, delegate)
    }

    #[test]
    fn test_delegation_record() {
        let (log, sender, delegate) = delegation_log(true, true);

        let loader = Loader::new(LoaderModule::Delegations, OrderKey::BlockTxLog);
        let record = loader.load(&decode(LoaderModule::Delegations, &log)).unwrap();

        assert_eq!(
            record.key,
            "00000000000000c800000000000000010000000000000004"
        );
        let delegation: DelegationRecord = serde_json::from_str(&record.value).unwrap();
        assert_eq!(delegation.delegator, sender);
        assert_eq!(delegation.delegate, delegate);
        assert!(delegation.authorize);
        assert_eq!(delegation.log_index, 4);
    }

    #[test]
    fn test_delegation_with_foreign_consent_is_rejected() {
        let (log, _, _) = delegation_log(true, false);
        let loader = Loader::new(LoaderModule::Delegations, OrderKey::BlockTxLog);
        let err = loader
            .load(&decode(LoaderModule::Delegations, &log))
            .unwrap_err();
        assert!(matches!(err, LoadError::Consent(_)));
    }

    #[test]
    fn test_delegation_requires_sender() {
        let (mut log, _, _) = delegation_log(false, true);
        log.sender = None;
        let loader = Loader::new(LoaderModule::Delegations, OrderKey::BlockTxLog);
        let err = loader
            .load(&decode(LoaderModule::Delegations, &log))
            .unwrap_err();
        assert!(matches!(err, LoadError::MissingSender));
    }

    #[test]
    fn test_logs_module_keeps_values() {
        let inputs = vec![AbiInput {
            name: "amount".to_string(),
            kind: "uint256".to_string(),
            indexed: false,
        }];
        let mut log = raw(
            vec![B256::repeat_byte(0x77)],
            U256::from(5).abi_encode(),
            300,
            0,
            1,
        );
        log.value = Some(U256::from(10));
        let decoded = Transformer::new(&inputs).unwrap().decode(&log).unwrap();

        let record = Loader::new(LoaderModule::Logs, OrderKey::BlockTxLog)
            .load(&decoded)
            .unwrap();
        let json: Value = serde_json::from_str(&record.value).unwrap();
        assert_eq!(json["values"]["amount"], "5");
        assert_eq!(json["blockNumber"], 300);
        assert_eq!(json["value"], "10");
        assert!(json.get("sender").is_none());
    }

    #[test]
    fn test_wrong_shape_is_field_error() {
        let log = transfer(Address::repeat_byte(1), 1, 1, 0);
        let decoded = decode(LoaderModule::Accounts, &log);
        let err = Loader::new(LoaderModule::Delegations, OrderKey::BlockTxLog)
            .load(&decoded)
            .unwrap_err();
        assert!(matches!(err, LoadError::Decode(DecodeError::Field { .. })));
    }
}
