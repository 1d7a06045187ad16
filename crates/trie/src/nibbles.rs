//! Nibble paths and hex-prefix encoding.

/// Expand bytes into nibbles, high nibble first.
pub fn to_nibbles(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(b >> 4);
        out.push(b & 0x0f);
    }
    out
}

/// Pack an even-length nibble path back into bytes.
///
/// A trailing odd nibble is dropped; stored keys are whole bytes.
pub fn from_nibbles(nibbles: &[u8]) -> Vec<u8> {
    nibbles
        .chunks_exact(2)
        .map(|pair| (pair[0] << 4) | pair[1])
        .collect()
}

/// Length of the shared prefix of two nibble paths.
pub fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Hex-prefix encode a nibble path with its leaf flag.
pub fn encode_hex_prefix(nibbles: &[u8], is_leaf: bool) -> Vec<u8> {
    let flag = if is_leaf { 2u8 } else { 0u8 };
    let mut out = Vec::with_capacity(nibbles.len() / 2 + 1);
    let rest = if nibbles.len() % 2 == 1 {
        out.push(((flag | 1) << 4) | nibbles[0]);
        &nibbles[1..]
    } else {
        out.push(flag << 4);
        nibbles
    };
    for pair in rest.chunks_exact(2) {
        out.push((pair[0] << 4) | pair[1]);
    }
    out
}

/// Decode a hex-prefix path, returning the nibbles and the leaf flag.
pub fn decode_hex_prefix(encoded: &[u8]) -> Option<(Vec<u8>, bool)> {
    let first = *encoded.first()?;
    let flag = first >> 4;
    if flag > 3 {
        return None;
    }
    let is_leaf = flag & 2 != 0;
    let mut nibbles = Vec::with_capacity(encoded.len() * 2);
    if flag & 1 == 1 {
        nibbles.push(first & 0x0f);
    } else if first & 0x0f != 0 {
        return None;
    }
    nibbles.extend(to_nibbles(&encoded[1..]));
    Some((nibbles, is_leaf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nibble_conversion() {
        assert_eq!(to_nibbles(&[0x12, 0xab]), vec![1, 2, 0xa, 0xb]);
        assert_eq!(from_nibbles(&[1, 2, 0xa, 0xb]), vec![0x12, 0xab]);
        assert!(to_nibbles(&[]).is_empty());
    }

    #[test]
    fn test_hex_prefix_vectors() {
        // Vectors from the Ethereum yellow paper appendix C
        assert_eq!(encode_hex_prefix(&[1, 2, 3, 4, 5], false), vec![0x11, 0x23, 0x45]);
        assert_eq!(encode_hex_prefix(&[0, 1, 2, 3, 4, 5], false), vec![0x00, 0x01, 0x23, 0x45]);
        assert_eq!(encode_hex_prefix(&[0, 0xf, 1, 0xc, 0xb, 8], true), vec![0x20, 0x0f, 0x1c, 0xb8]);
        assert_eq!(encode_hex_prefix(&[0xf, 1, 0xc, 0xb, 8], true), vec![0x3f, 0x1c, 0xb8]);
        assert_eq!(encode_hex_prefix(&[], true), vec![0x20]);
    }

    #[test]
    fn test_hex_prefix_decode() {
        for (path, leaf) in [(vec![1u8, 2, 3], true), (vec![4u8, 5], false), (vec![], true)] {
            let encoded = encode_hex_prefix(&path, leaf);
            assert_eq!(decode_hex_prefix(&encoded), Some((path, leaf)));
        }
        assert_eq!(decode_hex_prefix(&[]), None);
        assert_eq!(decode_hex_prefix(&[0x40]), None);
        assert_eq!(decode_hex_prefix(&[0x05]), None);
    }

    #[test]
    fn test_common_prefix() {
        assert_eq!(common_prefix(&[1, 2, 3], &[1, 2, 4]), 2);
        assert_eq!(common_prefix(&[1, 2], &[1, 2, 4]), 2);
        assert_eq!(common_prefix(&[], &[1]), 0);
    }
}
