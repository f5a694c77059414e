//! Byte helpers shared by every verifier: hex parsing of JSON values,
//! fixed-width big/little endian integers and leading-zero handling.
//!
//! All readers take a slice plus an offset and return `None` when the
//! requested width does not fit, so callers never index past a buffer.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexError {
    #[error("Invalid hex string: {reason}")]
    Invalid { reason: String },

    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

/// Decode a hex string with optional `0x` prefix.
/// Odd-length strings (JSON quantities like `0x1`) get a leading zero nibble.
pub fn parse_hex(s: &str) -> Result<Vec<u8>, HexError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let decoded = if s.len() % 2 == 1 {
        hex::decode(format!("0{}", s))
    } else {
        hex::decode(s)
    };
    decoded.map_err(|e| HexError::Invalid {
        reason: e.to_string(),
    })
}

/// Decode a hex string into exactly `N` bytes.
pub fn parse_fixed<const N: usize>(s: &str) -> Result<[u8; N], HexError> {
    let bytes = parse_hex(s)?;
    if bytes.len() != N {
        return Err(HexError::WrongLength {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

pub fn hex_to_bytes32(s: &str) -> Result<[u8; 32], HexError> {
    parse_fixed::<32>(s)
}

pub fn hex_to_address(s: &str) -> Result<[u8; 20], HexError> {
    parse_fixed::<20>(s)
}

/// Parse a JSON-RPC quantity (`0x`-prefixed hex, at most 8 significant bytes).
pub fn parse_quantity(s: &str) -> Result<u64, HexError> {
    let bytes = parse_hex(s)?;
    be_to_u64(&bytes).ok_or(HexError::WrongLength {
        expected: 8,
        actual: strip_leading_zeros(&bytes).len(),
    })
}

/// `0x`-prefixed lowercase hex.
pub fn to_hex(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

/// `0x`-prefixed quantity without leading zeros (`0x0` for zero).
pub fn to_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

pub fn strip_leading_zeros(data: &[u8]) -> &[u8] {
    let start = data.iter().position(|b| *b != 0).unwrap_or(data.len());
    &data[start..]
}

/// Big-endian bytes to `u64`. Empty input is zero; more than eight
/// significant bytes do not fit.
pub fn be_to_u64(data: &[u8]) -> Option<u64> {
    let data = strip_leading_zeros(data);
    if data.len() > 8 {
        return None;
    }
    Some(data.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

/// Minimal big-endian encoding of a `u64` (empty for zero).
pub fn u64_to_be_minimal(value: u64) -> Vec<u8> {
    strip_leading_zeros(&value.to_be_bytes()).to_vec()
}

/// Left-pad (or reject) a big-endian value into 32 bytes.
pub fn to_bytes32(data: &[u8]) -> Option<[u8; 32]> {
    let data = strip_leading_zeros(data);
    if data.len() > 32 {
        return None;
    }
    let mut out = [0u8; 32];
    out[32 - data.len()..].copy_from_slice(data);
    Some(out)
}

pub fn le_u16(data: &[u8], offset: usize) -> Option<u16> {
    let b = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

pub fn le_u32(data: &[u8], offset: usize) -> Option<u32> {
    let b = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn le_u64(data: &[u8], offset: usize) -> Option<u64> {
    let b = data.get(offset..offset.checked_add(8)?)?;
    let mut arr = [0u8; 8];
    arr.copy_from_slice(b);
    Some(u64::from_le_bytes(arr))
}

/// Byte-reversed copy of a 32-byte hash (bitcoin display order <-> internal order).
pub fn reversed(hash: &[u8; 32]) -> [u8; 32] {
    let mut out = *hash;
    out.reverse();
    out
}
