use super::{encode_path, to_nibbles};
use crate::crypto::keccak256;
use crate::rlp::{encode_item, encode_list};
use std::collections::BTreeMap;

/// In-memory trie over a fixed set of entries. Computes the root hash and
/// produces proofs for present and absent keys.
#[derive(Debug, Default, Clone)]
pub struct TrieBuilder {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

struct Entry<'a> {
    nibbles: Vec<u8>,
    value: &'a [u8],
}

impl TrieBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value. Empty values are not stored.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) {
        if value.is_empty() {
            self.entries.remove(key);
        } else {
            self.entries.insert(key.to_vec(), value.to_vec());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn root(&self) -> [u8; 32] {
        keccak256(&self.encode(None).0)
    }

    /// Proof nodes from the root down to where `key` resolves.
    pub fn proof(&self, key: &[u8]) -> Vec<Vec<u8>> {
        self.encode(Some(&to_nibbles(key))).1
    }

    fn encode(&self, key: Option<&[u8]>) -> (Vec<u8>, Vec<Vec<u8>>) {
        let entries: Vec<Entry> = self
            .entries
            .iter()
            .map(|(k, v)| Entry {
                nibbles: to_nibbles(k),
                value: v,
            })
            .collect();
        let refs: Vec<&Entry> = entries.iter().collect();

        let mut collected = Vec::new();
        let root = encode_node(&refs, 0, key, &mut collected);
        // the root is always referenced by hash, even when short
        if key.is_some() {
            if let Some(first) = collected.first_mut() {
                *first = Some(root.clone());
            }
        }
        (root, collected.into_iter().flatten().collect())
    }
}

/// Encode the node holding `entries` (all sharing the first `depth` nibbles).
/// Nodes on the path of `key` reserve a slot in `proof` before their children
/// so the proof comes out root first; slots of embedded nodes stay empty.
fn encode_node(
    entries: &[&Entry],
    depth: usize,
    key: Option<&[u8]>,
    proof: &mut Vec<Option<Vec<u8>>>,
) -> Vec<u8> {
    let slot = key.map(|_| {
        proof.push(None);
        proof.len() - 1
    });

    let encoded = match entries {
        [] => vec![0x80],
        [single] => {
            let mut payload = Vec::new();
            encode_item(&mut payload, &encode_path(&single.nibbles[depth..], true));
            encode_item(&mut payload, single.value);
            list(&payload)
        }
        _ => {
            let shared = common_prefix(entries, depth);
            if shared > 0 {
                let prefix = &entries[0].nibbles[depth..depth + shared];
                let child_key = key.filter(|k| k.len() >= depth + shared && &k[depth..depth + shared] == prefix);
                let child = encode_node(entries, depth + shared, child_key, proof);
                let mut payload = Vec::new();
                encode_item(&mut payload, &encode_path(prefix, false));
                append_ref(&mut payload, &child);
                list(&payload)
            } else {
                encode_branch(entries, depth, key, proof)
            }
        }
    };

    if let Some(slot) = slot {
        if encoded.len() >= 32 {
            proof[slot] = Some(encoded.clone());
        }
    }
    encoded
}

fn encode_branch(
    entries: &[&Entry],
    depth: usize,
    key: Option<&[u8]>,
    proof: &mut Vec<Option<Vec<u8>>>,
) -> Vec<u8> {
    let mut payload = Vec::new();
    for nibble in 0..16u8 {
        let group: Vec<&Entry> = entries
            .iter()
            .filter(|e| e.nibbles.len() > depth && e.nibbles[depth] == nibble)
            .copied()
            .collect();
        if group.is_empty() {
            encode_item(&mut payload, &[]);
            continue;
        }
        let child_key = key.filter(|k| k.get(depth) == Some(&nibble));
        let child = encode_node(&group, depth + 1, child_key, proof);
        append_ref(&mut payload, &child);
    }
    let value = entries
        .iter()
        .find(|e| e.nibbles.len() == depth)
        .map(|e| e.value)
        .unwrap_or(&[]);
    encode_item(&mut payload, value);
    list(&payload)
}

/// Children shorter than 32 bytes are embedded, others referenced by hash.
fn append_ref(out: &mut Vec<u8>, child: &[u8]) {
    if child.len() < 32 {
        out.extend_from_slice(child);
    } else {
        encode_item(out, &keccak256(child));
    }
}

fn list(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 3);
    encode_list(&mut out, payload);
    out
}

fn common_prefix(entries: &[&Entry], depth: usize) -> usize {
    let first = &entries[0].nibbles[depth..];
    entries[1..].iter().fold(first.len(), |shared, e| {
        let other = &e.nibbles[depth..];
        shared.min(first.iter().zip(other).take_while(|(a, b)| a == b).count())
    })
}
