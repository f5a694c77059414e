//! Bitcoin transaction merkle trees. Unlike the Patricia trie these are plain
//! binary trees over double-SHA256, with a lone last node paired with itself.

use crate::bytes::reversed;
use crate::crypto::sha256d;

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    sha256d(&buf)
}

/// Merkle root over leaves in internal byte order.
pub fn root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }
    level[0]
}

/// Merkle root of transaction ids given in display order, returned in
/// display order.
pub fn root_from_txids(txids: &[[u8; 32]]) -> [u8; 32] {
    let leaves: Vec<[u8; 32]> = txids.iter().map(reversed).collect();
    reversed(&root(&leaves))
}

/// Check that `leaf` sits at `index` under `root`. `siblings` is the
/// concatenation of the 32-byte sibling hashes from the leaf level up; all
/// hashes are in internal byte order.
pub fn verify_proof(root: &[u8; 32], siblings: &[u8], index: u64, leaf: &[u8; 32]) -> bool {
    if siblings.len() % 32 != 0 {
        return false;
    }
    let mut index = index;
    let mut current = *leaf;
    for chunk in siblings.chunks(32) {
        let mut sibling = [0u8; 32];
        sibling.copy_from_slice(chunk);
        current = if index % 2 == 0 {
            hash_pair(&current, &sibling)
        } else {
            hash_pair(&sibling, &current)
        };
        index /= 2;
    }
    // a proof for an index beyond the tree would leave bits unconsumed
    index == 0 && current == *root
}

/// Sibling path for `index`, the counterpart of [`verify_proof`].
pub fn proof(leaves: &[[u8; 32]], index: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut level = leaves.to_vec();
    let mut index = index;
    while level.len() > 1 {
        let sibling = if index % 2 == 0 {
            level.get(index + 1).unwrap_or(&level[index])
        } else {
            &level[index - 1]
        };
        out.extend_from_slice(sibling);
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
        index /= 2;
    }
    out
}
