//! Merkle-Patricia trie: proof verification and a small in-memory builder.
//!
//! Keys are walked nibble by nibble. Nodes are referenced by keccak256 hash,
//! except nodes whose encoding is shorter than 32 bytes, which are embedded
//! directly in their parent.

mod builder;
mod proof;

pub use builder::TrieBuilder;
pub use proof::{verify_proof, Expected, MAX_TRIE_DEPTH};

use crate::rlp::RlpError;
use thiserror::Error;

/// Root hash of the empty trie: keccak256(rlp("")).
pub const EMPTY_ROOT: [u8; 32] = [
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8,
    0x6e, 0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63,
    0xb4, 0x21,
];

/// Errors during Merkle-Patricia trie proof verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrieError {
    #[error("Empty proof: no trie nodes provided")]
    EmptyProof,

    #[error("Hash of proof node {index} is {computed}, expected {expected}")]
    HashMismatch {
        index: usize,
        computed: String,
        expected: String,
    },

    #[error("Invalid RLP in proof node {index}: {source}")]
    InvalidRlp { index: usize, source: RlpError },

    #[error("Invalid trie node {index}: {reason}")]
    InvalidNode { index: usize, reason: String },

    #[error("Proof ended after {nodes} nodes without reaching the key")]
    IncompleteProof { nodes: usize },

    #[error("Proof resolved the key at node {index} but carries more nodes")]
    TrailingNodes { index: usize },

    #[error("Proof exceeds the maximum trie depth")]
    TooDeep,

    #[error("Proven value does not match the expected value")]
    ValueMismatch,

    #[error("Proof shows a value where absence was expected")]
    UnexpectedValue,

    #[error("Proof shows the key is not in the trie")]
    ValueNotFound,
}

pub(crate) fn to_nibbles(path: &[u8]) -> Vec<u8> {
    path.iter().flat_map(|b| [b >> 4, b & 0x0f]).collect()
}

/// Hex-prefix encode a nibble path.
pub(crate) fn encode_path(nibbles: &[u8], leaf: bool) -> Vec<u8> {
    let flag = if leaf { 2u8 } else { 0u8 };
    let mut out = Vec::with_capacity(nibbles.len() / 2 + 1);
    let rest = if nibbles.len() % 2 == 1 {
        out.push(((flag + 1) << 4) | nibbles[0]);
        &nibbles[1..]
    } else {
        out.push(flag << 4);
        nibbles
    };
    for pair in rest.chunks(2) {
        out.push((pair[0] << 4) | pair[1]);
    }
    out
}

/// Decode a hex-prefix path into (nibbles, is_leaf).
pub(crate) fn decode_path(encoded: &[u8]) -> Option<(Vec<u8>, bool)> {
    let first = *encoded.first()?;
    let flag = first >> 4;
    if flag > 3 {
        return None;
    }
    let mut nibbles = Vec::with_capacity(encoded.len() * 2);
    if flag & 1 == 1 {
        nibbles.push(first & 0x0f);
    } else if first & 0x0f != 0 {
        return None;
    }
    nibbles.extend(to_nibbles(&encoded[1..]));
    Some((nibbles, flag & 2 == 2))
}
