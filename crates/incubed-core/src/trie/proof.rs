use super::{decode_path, to_nibbles, TrieError, EMPTY_ROOT};
use crate::crypto::keccak256;
use crate::rlp::{self, RlpItem};

/// Upper bound on nodes visited in one proof, embedded nodes included.
pub const MAX_TRIE_DEPTH: usize = 128;

/// What the caller expects the proof to show for the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expected<'a> {
    /// The key holds exactly these bytes.
    Value(&'a [u8]),
    /// Return whatever the proof resolves to; absence is reported as `None`.
    Fetch,
    /// The key is not in the trie.
    Absent,
}

/// Where one node sends the walk next.
enum Step<'p> {
    Hash(&'p [u8]),
    Value(&'p [u8]),
    Absent,
}

/// Verify a Merkle-Patricia proof for `path` (the raw, unhashed trie key)
/// against `root`.
///
/// The first node must hash to `root`, every further node to the hash its
/// parent references for the next nibbles of the key. The terminal outcome
/// (value or absence) must come from the last node of the proof.
///
/// Returns the proven value, or `None` when the proof shows the key is absent
/// and that was acceptable for `expected`.
pub fn verify_proof<'p>(
    root: &[u8; 32],
    path: &[u8],
    proof: &'p [Vec<u8>],
    expected: Expected<'_>,
) -> Result<Option<&'p [u8]>, TrieError> {
    if proof.is_empty() {
        if *root == EMPTY_ROOT {
            return resolve(None, expected);
        }
        return Err(TrieError::EmptyProof);
    }

    let key = to_nibbles(path);
    let mut pos = 0usize;
    let mut depth = 0usize;
    let mut wanted: &[u8] = root;

    for (index, node) in proof.iter().enumerate() {
        let computed = keccak256(node);
        if computed[..] != *wanted {
            return Err(TrieError::HashMismatch {
                index,
                computed: hex::encode(computed),
                expected: hex::encode(wanted),
            });
        }

        let is_last = index + 1 == proof.len();
        match walk_node(node, index, &key, &mut pos, &mut depth)? {
            Step::Hash(next) => {
                if is_last {
                    return Err(TrieError::IncompleteProof { nodes: proof.len() });
                }
                wanted = next;
            }
            Step::Value(value) => {
                if !is_last {
                    return Err(TrieError::TrailingNodes { index });
                }
                return resolve(Some(value), expected);
            }
            Step::Absent => {
                if !is_last {
                    return Err(TrieError::TrailingNodes { index });
                }
                return resolve(None, expected);
            }
        }
    }

    Err(TrieError::IncompleteProof { nodes: proof.len() })
}

fn resolve<'p>(
    found: Option<&'p [u8]>,
    expected: Expected<'_>,
) -> Result<Option<&'p [u8]>, TrieError> {
    match (expected, found) {
        (Expected::Value(want), Some(value)) if want == value => Ok(Some(value)),
        (Expected::Value(_), Some(_)) => Err(TrieError::ValueMismatch),
        (Expected::Value(_), None) => Err(TrieError::ValueNotFound),
        (Expected::Fetch, found) => Ok(found),
        (Expected::Absent, Some(_)) => Err(TrieError::UnexpectedValue),
        (Expected::Absent, None) => Ok(None),
    }
}

fn walk_node<'p>(
    node: &'p [u8],
    index: usize,
    key: &[u8],
    pos: &mut usize,
    depth: &mut usize,
) -> Result<Step<'p>, TrieError> {
    let rlp_err = |source| TrieError::InvalidRlp { index, source };
    match rlp::decode(node, 0).map_err(rlp_err)? {
        Some(RlpItem::List(payload)) => walk_list(payload, index, key, pos, depth),
        // the empty trie is encoded as the empty string
        Some(RlpItem::Item(data)) if data.is_empty() => Ok(Step::Absent),
        _ => Err(TrieError::InvalidNode {
            index,
            reason: "node is not a list".to_string(),
        }),
    }
}

fn walk_list<'p>(
    payload: &'p [u8],
    index: usize,
    key: &[u8],
    pos: &mut usize,
    depth: &mut usize,
) -> Result<Step<'p>, TrieError> {
    *depth += 1;
    if *depth > MAX_TRIE_DEPTH {
        return Err(TrieError::TooDeep);
    }

    let rlp_err = |source| TrieError::InvalidRlp { index, source };
    let invalid = |reason: &str| TrieError::InvalidNode {
        index,
        reason: reason.to_string(),
    };

    match rlp::count(payload).map_err(rlp_err)? {
        17 => {
            if *pos == key.len() {
                let value = rlp::bytes_at(payload, 16).map_err(rlp_err)?;
                return Ok(if value.is_empty() {
                    Step::Absent
                } else {
                    Step::Value(value)
                });
            }
            let nibble = key[*pos] as usize;
            *pos += 1;
            match rlp::decode(payload, nibble).map_err(rlp_err)? {
                Some(RlpItem::List(embedded)) => walk_list(embedded, index, key, pos, depth),
                Some(RlpItem::Item(child)) => child_ref(child, index),
                None => Err(invalid("branch child missing")),
            }
        }
        2 => {
            let encoded_path = rlp::bytes_at(payload, 0).map_err(rlp_err)?;
            let (path, is_leaf) =
                decode_path(encoded_path).ok_or_else(|| invalid("invalid hex-prefix path"))?;
            let remaining = &key[*pos..];

            if is_leaf {
                if remaining != path.as_slice() {
                    return Ok(Step::Absent);
                }
                *pos = key.len();
                return Ok(Step::Value(rlp::bytes_at(payload, 1).map_err(rlp_err)?));
            }

            if path.is_empty() || !remaining.starts_with(&path) {
                return Ok(Step::Absent);
            }
            *pos += path.len();
            match rlp::decode(payload, 1).map_err(rlp_err)? {
                Some(RlpItem::List(embedded)) => walk_list(embedded, index, key, pos, depth),
                Some(RlpItem::Item(child)) => child_ref(child, index),
                None => Err(invalid("extension child missing")),
            }
        }
        n => Err(invalid(&format!("{}-element list", n))),
    }
}

fn child_ref(child: &[u8], index: usize) -> Result<Step<'_>, TrieError> {
    match child.len() {
        0 => Ok(Step::Absent),
        32 => Ok(Step::Hash(child)),
        n => Err(TrieError::InvalidNode {
            index,
            reason: format!("child reference of {} bytes", n),
        }),
    }
}
