//! Mined regtest-difficulty blocks with matching JSON results and proofs.

use crate::btc::merkle;
use crate::btc::serialize::{write_varint, BlockHeader, HEADER_SIZE};
use crate::btc::target::{dap, meets_target, target_from_bits, TargetCache};
use crate::btc::tx::Transaction;
use crate::bytes::reversed;
use serde_json::{json, Value};

/// Regtest bits: roughly every second nonce meets the target.
pub const REGTEST_BITS: u32 = 0x207fffff;

const VERSION: u32 = 0x2000_0000;
const TIME: u32 = 1_600_000_000;

/// Mine a header on top of `parent` (display order) committing to
/// `merkle_root` (internal order).
pub fn mine_header(parent: [u8; 32], merkle_root: [u8; 32], bits: u32) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&VERSION.to_le_bytes());
    header[4..36].copy_from_slice(&reversed(&parent));
    header[36..68].copy_from_slice(&merkle_root);
    header[68..72].copy_from_slice(&TIME.to_le_bytes());
    header[72..76].copy_from_slice(&bits.to_le_bytes());

    let target = target_from_bits(bits);
    for nonce in 0u32.. {
        header[76..80].copy_from_slice(&nonce.to_le_bytes());
        if meets_target(&BlockHeader::from(&header).hash(), target) {
            break;
        }
    }
    header
}

/// `n` linked headers, the first one on top of `parent`.
pub fn mine_chain(parent: [u8; 32], n: usize, bits: u32) -> Vec<[u8; HEADER_SIZE]> {
    let mut parent = parent;
    (0..n)
        .map(|i| {
            let header = mine_header(parent, [i as u8 + 1; 32], bits);
            parent = BlockHeader::from(&header).hash();
            header
        })
        .collect()
}

/// Coinbase committing to `height` the BIP34 way.
pub fn coinbase_tx(height: u64) -> Vec<u8> {
    let mut script = vec![3];
    script.extend_from_slice(&height.to_le_bytes()[..3]);
    script.extend_from_slice(b"incubed");
    transaction([0u8; 32], 0xffff_ffff, &script, 625_000_000)
}

/// A one-in, one-out legacy transaction.
fn transaction(prev_tx: [u8; 32], prev_index: u32, script_sig: &[u8], value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&2u32.to_le_bytes());
    write_varint(&mut out, 1);
    out.extend_from_slice(&prev_tx);
    out.extend_from_slice(&prev_index.to_le_bytes());
    write_varint(&mut out, script_sig.len() as u64);
    out.extend_from_slice(script_sig);
    out.extend_from_slice(&0xffff_fffeu32.to_le_bytes());
    write_varint(&mut out, 1);
    out.extend_from_slice(&value.to_le_bytes());
    let script_pubkey = [0x76, 0xa9, 0x14, 0x00, 0x88, 0xac];
    write_varint(&mut out, script_pubkey.len() as u64);
    out.extend_from_slice(&script_pubkey);
    out.extend_from_slice(&0u32.to_le_bytes());
    out
}

/// A block at a post-BIP34 height with its final headers.
pub struct BtcBlockFixture {
    pub chain_id: u64,
    pub height: u64,
    pub bits: u32,
    pub finality: usize,
    pub header: [u8; HEADER_SIZE],
    pub transactions: Vec<Vec<u8>>,
    pub final_headers: Vec<[u8; HEADER_SIZE]>,
}

impl BtcBlockFixture {
    pub fn new(tx_count: usize, finality: usize) -> Self {
        let height = 700_123;
        let mut transactions = vec![coinbase_tx(height)];
        for i in 1..tx_count {
            transactions.push(transaction([i as u8; 32], i as u32, &[0x51], 5_000 * i as u64));
        }
        let leaves: Vec<[u8; 32]> = transactions
            .iter()
            .map(|tx| sha256d_leaf(tx))
            .collect();
        let header = mine_header([0x11; 32], merkle::root(&leaves), REGTEST_BITS);
        let final_headers = mine_chain(BlockHeader::from(&header).hash(), finality, REGTEST_BITS);
        Self {
            chain_id: 0x99,
            height,
            bits: REGTEST_BITS,
            finality,
            header,
            transactions,
            final_headers,
        }
    }

    pub fn hash(&self) -> [u8; 32] {
        BlockHeader::from(&self.header).hash()
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }

    /// Display-order transaction ids.
    pub fn txids(&self) -> Vec<[u8; 32]> {
        self.transactions
            .iter()
            .map(|tx| reversed(&sha256d_leaf(tx)))
            .collect()
    }

    /// A cache knowing the block's own DAP.
    pub fn target_cache(&self) -> TargetCache {
        let mut cache = TargetCache::new();
        cache.insert(dap(self.height), self.bits);
        cache
    }

    pub fn raw_block(&self) -> Vec<u8> {
        let mut out = self.header.to_vec();
        write_varint(&mut out, self.transactions.len() as u64);
        for tx in &self.transactions {
            out.extend_from_slice(tx);
        }
        out
    }

    /// Verbose (`verbosity` 1) `getblock` result.
    pub fn block_json(&self) -> Value {
        let header = BlockHeader::from(&self.header);
        let mut block = json!({
            "hash": self.hash_hex(),
            "confirmations": self.finality + 1,
            "height": self.height,
            "version": header.version(),
            "versionHex": format!("{:08x}", header.version()),
            "merkleroot": hex::encode(reversed(&header.merkle_root())),
            "tx": self.txids().iter().map(hex::encode).collect::<Vec<_>>(),
            "time": header.time(),
            "nonce": header.nonce(),
            "bits": format!("{:08x}", header.bits()),
            "difficulty": 4.656542373906925e-10,
            "nTx": self.transactions.len(),
            "previousblockhash": hex::encode(reversed(&header.parent_hash())),
        });
        if let Some(next) = self.final_headers.first() {
            block["nextblockhash"] = json!(hex::encode(BlockHeader::from(next).hash()));
        }
        block
    }

    /// `in3.proof` of a block request.
    pub fn proof_json(&self) -> Value {
        let leaves: Vec<[u8; 32]> = self.txids().iter().map(reversed).collect();
        json!({
            "final": hex::encode(self.final_headers.concat()),
            "cbtx": hex::encode(&self.transactions[0]),
            "cbtxMerkleProof": hex::encode(merkle::proof(&leaves, 0)),
        })
    }

    /// `in3.proof` of `getrawtransaction` for the transaction at `index`.
    pub fn tx_proof_json(&self, index: usize) -> Value {
        let leaves: Vec<[u8; 32]> = self.txids().iter().map(reversed).collect();
        let mut proof = self.proof_json();
        proof["block"] = json!(hex::encode(self.header));
        proof["txIndex"] = json!(index);
        proof["merkleProof"] = json!(hex::encode(merkle::proof(&leaves, index)));
        proof
    }

    /// Verbose `getrawtransaction` result for the transaction at `index`.
    pub fn tx_json(&self, index: usize) -> Value {
        let raw = &self.transactions[index];
        // fixture transactions are well-formed
        let tx = match Transaction::parse(raw) {
            Ok(tx) => tx,
            Err(e) => panic!("fixture transaction: {}", e),
        };
        let vin: Vec<Value> = tx
            .inputs
            .iter()
            .map(|input| {
                if index == 0 {
                    json!({"coinbase": hex::encode(input.script), "sequence": input.sequence})
                } else {
                    json!({
                        "txid": hex::encode(reversed(&input.prev_tx)),
                        "vout": input.prev_index,
                        "scriptSig": {"asm": "", "hex": hex::encode(input.script)},
                        "sequence": input.sequence,
                    })
                }
            })
            .collect();
        let vout: Vec<Value> = tx
            .outputs
            .iter()
            .enumerate()
            .map(|(n, output)| {
                json!({
                    "value": output.value as f64 / 100_000_000.0,
                    "n": n,
                    "scriptPubKey": {"hex": hex::encode(output.script)},
                })
            })
            .collect();
        json!({
            "txid": hex::encode(tx.txid()),
            "hash": hex::encode(tx.hash()),
            "version": tx.version,
            "size": tx.size(),
            "vsize": tx.vsize(),
            "weight": tx.weight(),
            "locktime": tx.lock_time,
            "vin": vin,
            "vout": vout,
            "hex": hex::encode(raw),
            "blockhash": self.hash_hex(),
            "confirmations": self.finality + 1,
            "time": TIME,
            "blocktime": TIME,
        })
    }
}

fn sha256d_leaf(tx: &[u8]) -> [u8; 32] {
    crate::crypto::sha256d(tx)
}
