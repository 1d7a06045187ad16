//! Pure decoding of raw logs into named values.

use alloy::dyn_abi::{DynSolEvent, DynSolType, DynSolValue};
use alloy::primitives::hex;
use serde_json::{Map, Value};
use thiserror::Error;

use super::source::RawLog;
use crate::config::AbiInput;

/// A log that could not be decoded. The log is skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input type that is not a Solidity type.
    #[error("Input '{name}' has invalid type '{kind}'")]
    InvalidType {
        /// Input name
        name: String,
        /// Offending type
        kind: String,
    },

    /// More indexed inputs than a log has topics.
    #[error("{0} indexed inputs do not fit in a log")]
    TooManyIndexed(usize),

    /// Log has no event signature topic.
    #[error("Log has no topics")]
    MissingSignature,

    /// Indexed inputs and topics disagree.
    #[error("Expected {expected} indexed topics, found {found}")]
    TopicCount {
        /// Indexed inputs
        expected: usize,
        /// Topics after the signature
        found: usize,
    },

    /// `data` does not decode against the non-indexed inputs.
    #[error("Invalid log data: {0}")]
    Data(String),

    /// A decoded value has the wrong shape for the loader.
    #[error("Field '{name}' is missing or not a {expected}")]
    Field {
        /// Field name
        name: String,
        /// Expected type
        expected: &'static str,
    },
}

/// A raw log with its decoded inputs, in declaration order.
#[derive(Debug, Clone)]
pub struct DecodedLog {
    /// The log as extracted
    pub log: RawLog,
    /// `(name, value)` per input
    pub values: Vec<(String, DynSolValue)>,
}

impl DecodedLog {
    /// Value of input `name`.
    pub fn get(&self, name: &str) -> Option<&DynSolValue> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    /// Inputs as a JSON object.
    pub fn values_json(&self) -> Value {
        let mut object = Map::new();
        for (name, value) in &self.values {
            object.insert(name.clone(), value_to_json(value));
        }
        Value::Object(object)
    }
}

/// Decoder for one event layout.
///
/// Indexed inputs of dynamic type (`string`, `bytes`, arrays, tuples) are
/// stored as the keccak256 of their encoding, so they decode to the 32-byte
/// topic itself.
#[derive(Debug, Clone)]
pub struct Transformer {
    inputs: Vec<AbiInput>,
    indexed: usize,
    event: DynSolEvent,
}

impl Transformer {
    /// Resolve every input type.
    pub fn new(inputs: &[AbiInput]) -> Result<Self, DecodeError> {
        let mut indexed = Vec::new();
        let mut body = Vec::new();

        for input in inputs {
            let ty: DynSolType = input.kind.parse().map_err(|_| DecodeError::InvalidType {
                name: input.name.clone(),
                kind: input.kind.clone(),
            })?;
            if input.indexed {
                indexed.push(ty);
            } else {
                body.push(ty);
            }
        }

        // the signature topic is stripped before decoding, so the event is
        // described as anonymous
        let count = indexed.len();
        let event = DynSolEvent::new(None, indexed, DynSolType::Tuple(body))
            .ok_or(DecodeError::TooManyIndexed(count))?;

        Ok(Self {
            inputs: inputs.to_vec(),
            indexed: count,
            event,
        })
    }

    /// Decode `log`. Indexed inputs are read from `topics[1..]`, the others
    /// from `data`.
    pub fn decode(&self, log: &RawLog) -> Result<DecodedLog, DecodeError> {
        let Some((_, topics)) = log.topics.split_first() else {
            return Err(DecodeError::MissingSignature);
        };

        let expected = self.indexed;
        if topics.len() != expected {
            return Err(DecodeError::TopicCount {
                expected,
                found: topics.len(),
            });
        }

        let decoded = self
            .event
            .decode_log_parts(topics.iter().copied(), &log.data, false)
            .map_err(|e| DecodeError::Data(e.to_string()))?;

        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        let mut values = Vec::with_capacity(self.inputs.len());

        for input in &self.inputs {
            let value = if input.indexed {
                indexed.next()
            } else {
                body.next()
            };
            let value =
                value.ok_or_else(|| DecodeError::Data(format!("no value for {}", input.name)))?;
            values.push((input.name.clone(), value));
        }

        Ok(DecodedLog {
            log: log.clone(),
            values,
        })
    }
}

/// JSON form of a decoded value. Integers become decimal strings, byte
/// strings `0x` hex and addresses checksummed hex.
#[allow(unreachable_patterns)]
pub fn value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(hex::encode_prefixed(&word[..*size]))
        }
        DynSolValue::Address(a) => Value::String(a.to_checksum(None)),
        DynSolValue::Bytes(b) => Value::String(hex::encode_prefixed(b)),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(value_to_json).collect())
        }
        other => Value::String(format!("{:?}", other)),
    }
}
