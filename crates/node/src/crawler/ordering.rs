//! Ordering keys for crawler records.
//!
//! A key is a tuple of on-chain coordinates, each written as fixed-width,
//! zero-padded lowercase hex. String order of keys equals chain order.

use crate::config::OrderKey;

/// Hex digits per field.
pub const FIELD_WIDTH: usize = 16;

/// Concatenate `fields` as zero-padded hex of `width` digits each.
///
/// A value wider than `width` is written in full, so `width` must cover the
/// largest value for ordering to hold. [`FIELD_WIDTH`] covers every `u64`.
pub fn serialize(fields: &[u64], width: usize) -> String {
    fields
        .iter()
        .map(|field| format!("{:0width$x}", field, width = width))
        .collect()
}

/// Split a key produced by [`serialize`] back into its fields.
pub fn deserialize(key: &str, width: usize) -> Option<Vec<u64>> {
    if width == 0 || key.len() % width != 0 || !key.is_ascii() {
        return None;
    }
    (0..key.len())
        .step_by(width)
        .map(|start| u64::from_str_radix(&key[start..start + width], 16).ok())
        .collect()
}

/// Key of a log at `(block, tx, log)` under the path's layout.
pub fn key_for(order: OrderKey, block_number: u64, tx_index: u64, log_index: u64) -> String {
    match order {
        OrderKey::BlockTx => serialize(&[block_number, tx_index], FIELD_WIDTH),
        OrderKey::BlockTxLog => serialize(&[block_number, tx_index, log_index], FIELD_WIDTH),
    }
}
