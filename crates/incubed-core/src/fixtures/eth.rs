//! Ethereum test chains: sealed aura headers signed with known keys, blocks
//! with transaction and receipt tries, and a small state trie.

use crate::bytes::{to_hex, to_quantity, u64_to_be_minimal};
use crate::crypto::{keccak256, public_key_to_address};
use crate::eth::aura::{encode_validator_data, ValidatorHistory, ValidatorList, ValidatorState, ValidatorStateProof, INITIATE_CHANGE_TOPIC};
use crate::eth::header::{BlockHeader, EXTRA_DATA, SEALED_FIELD1, SEALED_FIELD2};
use crate::eth::signatures::signed_message;
use crate::rlp::{self, RlpList};
use crate::trie::{TrieBuilder, EMPTY_ROOT};
use crate::types::{AccountProof, AccountState, ChainSpec, Consensus, SignedBlockHash, StorageProof, ValidatorTransition};
use k256::ecdsa::SigningKey;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Deterministic key; `seed` must be non-zero.
pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).expect("non-zero seed is a valid scalar")
}

pub fn address_of(key: &SigningKey) -> [u8; 20] {
    let point = key.verifying_key().to_encoded_point(false);
    public_key_to_address(&point.as_bytes()[1..])
}

/// `r ‖ s ‖ v` with `v` in {0, 1}.
pub fn sign(key: &SigningKey, hash: &[u8; 32]) -> [u8; 65] {
    let (sig, recid) = key
        .sign_prehash_recoverable(hash)
        .expect("signing a 32 byte prehash");
    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&sig.to_bytes());
    out[64] = recid.to_byte();
    out
}

/// A federated signature as a signer node would deliver it.
pub fn sign_block_hash(
    key: &SigningKey,
    block_hash: &[u8; 32],
    number: u64,
    version: u32,
    registry_id: Option<&[u8; 32]>,
) -> SignedBlockHash {
    let message = signed_message(block_hash, number, version, registry_id);
    let sig = sign(key, &message);
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&sig[..32]);
    s.copy_from_slice(&sig[32..64]);
    SignedBlockHash {
        block: number,
        block_hash: *block_hash,
        msg_hash: message,
        r,
        s,
        v: sig[64] as u64 + 27,
        error: None,
    }
}

pub fn empty_uncles_hash() -> [u8; 32] {
    keccak256(&[0xc0])
}

/// The 13 unsealed header fields.
#[derive(Clone, Debug)]
pub struct HeaderFields {
    pub parent_hash: [u8; 32],
    pub uncles_hash: [u8; 32],
    pub miner: [u8; 20],
    pub state_root: [u8; 32],
    pub transactions_root: [u8; 32],
    pub receipts_root: [u8; 32],
    pub difficulty: u64,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
}

const POW_MIX_HASH: [u8; 32] = [0x11; 32];
const POW_NONCE: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 0x42];

impl HeaderFields {
    pub fn new(number: u64) -> Self {
        Self {
            parent_hash: [0x01; 32],
            uncles_hash: empty_uncles_hash(),
            miner: [0x0b; 20],
            state_root: EMPTY_ROOT,
            transactions_root: EMPTY_ROOT,
            receipts_root: EMPTY_ROOT,
            difficulty: 0x20000,
            number,
            gas_limit: 8_000_000,
            gas_used: 0,
            timestamp: 1_600_000_000 + number * 5,
            extra_data: b"incubed".to_vec(),
        }
    }

    pub fn base(&self) -> RlpList {
        RlpList::new()
            .bytes(&self.parent_hash)
            .bytes(&self.uncles_hash)
            .bytes(&self.miner)
            .bytes(&self.state_root)
            .bytes(&self.transactions_root)
            .bytes(&self.receipts_root)
            .bytes(&[0u8; 256])
            .uint(self.difficulty)
            .uint(self.number)
            .uint(self.gas_limit)
            .uint(self.gas_used)
            .uint(self.timestamp)
            .bytes(&self.extra_data)
    }

    /// PoW header with a fixed mix hash and nonce.
    pub fn pow(&self) -> Vec<u8> {
        self.base().bytes(&POW_MIX_HASH).bytes(&POW_NONCE).finish()
    }

    /// The unsealed fields as a block result.
    pub fn json(&self) -> Value {
        json!({
            "parentHash": to_hex(&self.parent_hash),
            "sha3Uncles": to_hex(&self.uncles_hash),
            "miner": to_hex(&self.miner),
            "stateRoot": to_hex(&self.state_root),
            "transactionsRoot": to_hex(&self.transactions_root),
            "receiptsRoot": to_hex(&self.receipts_root),
            "logsBloom": to_hex(&[0u8; 256]),
            "difficulty": to_quantity(self.difficulty),
            "number": to_quantity(self.number),
            "gasLimit": to_quantity(self.gas_limit),
            "gasUsed": to_quantity(self.gas_used),
            "timestamp": to_quantity(self.timestamp),
            "extraData": to_hex(&self.extra_data),
        })
    }
}

/// The sealed fields of an aura header, each still RLP encoded.
pub fn seal_fields(raw: &[u8]) -> Vec<Vec<u8>> {
    let fields = rlp::decode_list(raw).expect("header is a list");
    [SEALED_FIELD1, SEALED_FIELD2]
        .iter()
        .filter_map(|i| rlp::decode_with_span(fields, *i).expect("valid header"))
        .map(|(_, span)| fields[span].to_vec())
        .collect()
}

/// An authority round chain whose validators are `signing_key(1..=n)`.
pub struct AuraChain {
    pub chain_id: u64,
    pub validators: Vec<[u8; 20]>,
    pub validator_contract: [u8; 20],
    keys: Vec<SigningKey>,
    outsider: SigningKey,
}

impl AuraChain {
    pub fn new(n: usize) -> Self {
        let keys: Vec<SigningKey> = (1..=n).map(|i| signing_key(i as u8)).collect();
        Self {
            chain_id: 0x2a,
            validators: keys.iter().map(address_of).collect(),
            validator_contract: [0x0c; 20],
            keys,
            outsider: signing_key(0xee),
        }
    }

    fn genesis_transition(&self) -> ValidatorTransition {
        ValidatorTransition {
            block: 0,
            validators: self.validators.clone(),
        }
    }

    pub fn spec(&self) -> ChainSpec {
        ChainSpec::ethereum(
            self.chain_id,
            Consensus::AuthorityRound {
                validator_contract: Some(self.validator_contract),
                validators: vec![self.genesis_transition()],
            },
        )
    }

    pub fn history(&self) -> ValidatorHistory {
        ValidatorHistory::from_transitions(vec![self.genesis_transition()])
    }

    pub fn validator_for_step(&self, step: u64) -> [u8; 20] {
        self.validators[(step % self.validators.len() as u64) as usize]
    }

    fn seal_list(base: RlpList, step: u64, key: &SigningKey) -> Vec<u8> {
        let bare_hash = keccak256(&base.clone().finish());
        base.uint(step).bytes(&sign(key, &bare_hash)).finish()
    }

    /// Seal with step = block number, signed by the validator in turn.
    pub fn seal(&self, fields: &HeaderFields) -> Vec<u8> {
        let key = &self.keys[(fields.number % self.keys.len() as u64) as usize];
        Self::seal_list(fields.base(), fields.number, key)
    }

    /// `first` followed by `count - 1` linked empty blocks.
    pub fn chain_on(&self, first: HeaderFields, count: usize) -> Vec<Vec<u8>> {
        let mut out = vec![self.seal(&first)];
        let mut number = first.number;
        while out.len() < count {
            number += 1;
            let mut fields = HeaderFields::new(number);
            fields.parent_hash = keccak256(&out[out.len() - 1]);
            out.push(self.seal(&fields));
        }
        out
    }

    pub fn sealed_chain(&self, start: u64, count: usize) -> Vec<Vec<u8>> {
        self.chain_on(HeaderFields::new(start), count)
    }

    /// The same header re-sealed by a key outside the validator set.
    pub fn seal_with_outsider(&self, raw: &[u8]) -> Vec<u8> {
        let header = BlockHeader::parse(raw).expect("valid header");
        let step = header.step().expect("sealed header");
        let fields = rlp::decode_list(raw).expect("header is a list");
        let (_, extra) = rlp::decode_with_span(fields, EXTRA_DATA)
            .expect("valid header")
            .expect("header has extra data");
        let bare_hash = header.bare_hash().expect("valid header");
        RlpList::new()
            .raw(&fields[..extra.end])
            .uint(step)
            .bytes(&sign(&self.outsider, &bare_hash))
            .finish()
    }

    /// An `in3_validatorList` result announcing `validators` at `block`,
    /// finalized by every current validator.
    pub fn validator_change(&self, block: u64, validators: &[[u8; 20]]) -> ValidatorList {
        let topics = RlpList::new().bytes(&INITIATE_CHANGE_TOPIC).bytes(&[0u8; 32]).finish();
        let log = RlpList::new()
            .bytes(&self.validator_contract)
            .raw(&topics)
            .bytes(&encode_validator_data(validators))
            .finish();
        let receipt = RlpList::new()
            .uint(1)
            .uint(50_000)
            .bytes(&[0u8; 256])
            .raw(&RlpList::new().raw(&log).finish())
            .finish();

        let path = rlp::encode_tx_path(0);
        let mut receipts = TrieBuilder::new();
        receipts.insert(&path, &receipt);
        let mut fields = HeaderFields::new(block);
        fields.receipts_root = receipts.root();
        let headers = self.chain_on(fields, self.validators.len());

        ValidatorList {
            states: vec![ValidatorState {
                block,
                validators: validators.to_vec(),
                proof: Some(ValidatorStateProof {
                    block: headers[0].clone(),
                    finality_blocks: headers[1..].to_vec(),
                    proof: receipts.proof(&path),
                    tx_index: 0,
                    log_index: 0,
                }),
            }],
        }
    }
}

/// A block with `n` transactions (legacy and dynamic fee alternating), their
/// receipts and the tries both roots are computed from.
pub struct BlockFixture {
    pub number: u64,
    pub header: Vec<u8>,
    pub finality_blocks: Vec<Vec<u8>>,
    pub transactions: Vec<Vec<u8>>,
    pub tx_json: Vec<Value>,
    pub receipts: Vec<Vec<u8>>,
    pub receipts_json: Vec<Value>,
    header_json: Value,
    tx_trie: TrieBuilder,
    receipt_trie: TrieBuilder,
}

struct TxData {
    raw: Vec<u8>,
    json: Value,
    receipt: Vec<u8>,
    receipt_json: Value,
}

fn hex_list(items: &[Vec<u8>]) -> Vec<String> {
    items.iter().map(|i| to_hex(i)).collect()
}

/// Transaction `i` and its receipt, without block references yet.
fn transaction(i: usize) -> TxData {
    let nonce = i as u64;
    let to = [0x20 + i as u8; 20];
    let value = (i as u64 + 1) * 1_000;
    let r = [i as u8 + 1; 32];
    let s = [i as u8 + 2; 32];
    let cumulative = 21_000 * (i as u64 + 1);

    let (raw, json, tx_type) = if i % 2 == 0 {
        let raw = RlpList::new()
            .uint(nonce)
            .uint(1_000_000_000)
            .uint(21_000)
            .bytes(&to)
            .uint(value)
            .bytes(&[])
            .uint(0x25)
            .uint_bytes(&r)
            .uint_bytes(&s)
            .finish();
        let json = json!({
            "type": "0x0",
            "nonce": to_quantity(nonce),
            "gasPrice": to_quantity(1_000_000_000),
            "gas": to_quantity(21_000),
            "to": to_hex(&to),
            "value": to_quantity(value),
            "input": "0x",
            "v": "0x25",
            "r": to_hex(&r),
            "s": to_hex(&s),
        });
        (raw, json, 0u8)
    } else {
        let key = [i as u8; 32];
        let access_list = RlpList::new()
            .raw(&RlpList::new().bytes(&[0x33; 20]).raw(&RlpList::new().bytes(&key).finish()).finish())
            .finish();
        let input = [0xa9, 0x05, 0x9c, 0xbb];
        let body = RlpList::new()
            .uint(1)
            .uint(nonce)
            .uint(1_000_000_000)
            .uint(2_000_000_000)
            .uint(50_000)
            .bytes(&to)
            .uint(value)
            .bytes(&input)
            .raw(&access_list)
            .uint(1)
            .uint_bytes(&r)
            .uint_bytes(&s)
            .finish();
        let mut raw = vec![0x02];
        raw.extend_from_slice(&body);
        let json = json!({
            "type": "0x2",
            "chainId": "0x1",
            "nonce": to_quantity(nonce),
            "maxPriorityFeePerGas": to_quantity(1_000_000_000),
            "maxFeePerGas": to_quantity(2_000_000_000),
            "gasPrice": to_quantity(1_500_000_000),
            "gas": to_quantity(50_000),
            "to": to_hex(&to),
            "value": to_quantity(value),
            "input": to_hex(&input),
            "accessList": [{"address": to_hex(&[0x33; 20]), "storageKeys": [to_hex(&key)]}],
            "v": "0x1",
            "yParity": "0x1",
            "r": to_hex(&r),
            "s": to_hex(&s),
        });
        (raw, json, 2u8)
    };

    let mut logs = RlpList::new();
    let mut logs_json = Vec::new();
    if i % 2 == 1 {
        let topics = [[0xaa; 32], [i as u8; 32]];
        let data = [i as u8, 1, 2];
        logs = logs.raw(
            &RlpList::new()
                .bytes(&[0x44; 20])
                .raw(&RlpList::new().bytes(&topics[0]).bytes(&topics[1]).finish())
                .bytes(&data)
                .finish(),
        );
        logs_json.push(json!({
            "address": to_hex(&[0x44; 20]),
            "topics": [to_hex(&topics[0]), to_hex(&topics[1])],
            "data": to_hex(&data),
            "logIndex": "0x0",
            "removed": false,
        }));
    }
    let body = RlpList::new()
        .uint(1)
        .uint(cumulative)
        .bytes(&[0u8; 256])
        .raw(&logs.finish())
        .finish();
    let receipt = if tx_type == 0 {
        body
    } else {
        let mut typed = vec![tx_type];
        typed.extend_from_slice(&body);
        typed
    };
    let receipt_json = json!({
        "type": to_quantity(tx_type as u64),
        "status": "0x1",
        "cumulativeGasUsed": to_quantity(cumulative),
        "gasUsed": to_quantity(21_000),
        "logsBloom": to_hex(&[0u8; 256]),
        "contractAddress": null,
        "to": to_hex(&to),
        "logs": logs_json,
    });

    TxData {
        raw,
        json,
        receipt,
        receipt_json,
    }
}

impl BlockFixture {
    pub fn pow(tx_count: usize) -> Self {
        Self::build(4_000_000, tx_count, |fields| {
            let mut json = fields.json();
            json["mixHash"] = json!(to_hex(&POW_MIX_HASH));
            json["nonce"] = json!(to_hex(&POW_NONCE));
            (vec![fields.pow()], json)
        })
    }

    /// A sealed block at height 100 followed by `finality` sealed blocks.
    pub fn aura(chain: &AuraChain, tx_count: usize, finality: usize) -> Self {
        Self::build(100, tx_count, |fields| {
            let headers = chain.chain_on(fields.clone(), finality + 1);
            let mut json = fields.json();
            json["sealFields"] = json!(hex_list(&seal_fields(&headers[0])));
            (headers, json)
        })
    }

    fn build(number: u64, tx_count: usize, seal: impl FnOnce(&HeaderFields) -> (Vec<Vec<u8>>, Value)) -> Self {
        let data: Vec<TxData> = (0..tx_count).map(transaction).collect();
        let mut tx_trie = TrieBuilder::new();
        let mut receipt_trie = TrieBuilder::new();
        for (i, tx) in data.iter().enumerate() {
            let path = rlp::encode_tx_path(i as u64);
            tx_trie.insert(&path, &tx.raw);
            receipt_trie.insert(&path, &tx.receipt);
        }

        let mut fields = HeaderFields::new(number);
        fields.transactions_root = tx_trie.root();
        fields.receipts_root = receipt_trie.root();
        fields.gas_used = 21_000 * tx_count as u64;
        let (mut headers, header_json) = seal(&fields);
        let header = headers.remove(0);
        let block_hash = to_hex(&keccak256(&header));

        let mut transactions = Vec::new();
        let mut tx_json = Vec::new();
        let mut receipts = Vec::new();
        let mut receipts_json = Vec::new();
        for (i, tx) in data.into_iter().enumerate() {
            let tx_hash = to_hex(&keccak256(&tx.raw));
            let refs = json!({
                "blockHash": block_hash,
                "blockNumber": to_quantity(number),
                "transactionIndex": to_quantity(i as u64),
            });
            let mut tx_value = tx.json;
            let mut receipt_value = tx.receipt_json;
            for (k, v) in refs.as_object().into_iter().flatten() {
                tx_value[k] = v.clone();
                receipt_value[k] = v.clone();
            }
            tx_value["hash"] = json!(tx_hash);
            tx_value["from"] = json!(to_hex(&[0x0f; 20]));
            receipt_value["transactionHash"] = json!(tx_hash);
            receipt_value["from"] = json!(to_hex(&[0x0f; 20]));
            for log in receipt_value["logs"].as_array_mut().into_iter().flatten() {
                for (k, v) in refs.as_object().into_iter().flatten() {
                    log[k] = v.clone();
                }
                log["transactionHash"] = json!(tx_hash);
            }

            transactions.push(tx.raw);
            tx_json.push(tx_value);
            receipts.push(tx.receipt);
            receipts_json.push(receipt_value);
        }

        Self {
            number,
            header,
            finality_blocks: headers,
            transactions,
            tx_json,
            receipts,
            receipts_json,
            header_json,
            tx_trie,
            receipt_trie,
        }
    }

    pub fn hash(&self) -> [u8; 32] {
        keccak256(&self.header)
    }

    pub fn tx_hash_hex(&self, index: usize) -> String {
        to_hex(&keccak256(&self.transactions[index]))
    }

    /// `eth_getBlockBy*` result with transaction hashes or full objects.
    pub fn block_json(&self, full: bool) -> Value {
        let mut block = self.header_json.clone();
        block["hash"] = json!(to_hex(&self.hash()));
        block["uncles"] = json!([]);
        block["size"] = json!(to_quantity(self.header.len() as u64));
        block["transactions"] = if full {
            json!(self.tx_json)
        } else {
            json!((0..self.transactions.len()).map(|i| self.tx_hash_hex(i)).collect::<Vec<_>>())
        };
        block
    }

    fn proof(&self, kind: &str) -> Value {
        json!({
            "type": kind,
            "block": to_hex(&self.header),
            "finalityBlocks": hex_list(&self.finality_blocks),
        })
    }

    pub fn block_proof(&self) -> Value {
        let mut proof = self.proof("blockProof");
        proof["transactions"] = json!(hex_list(&self.transactions));
        proof
    }

    pub fn receipt_proof(&self, index: usize) -> Value {
        let path = rlp::encode_tx_path(index as u64);
        let mut proof = self.proof("receiptProof");
        proof["txIndex"] = json!(to_quantity(index as u64));
        proof["merkleProof"] = json!(hex_list(&self.receipt_trie.proof(&path)));
        proof["txProof"] = json!(hex_list(&self.tx_trie.proof(&path)));
        proof
    }

    pub fn tx_proof(&self, index: usize) -> Value {
        let path = rlp::encode_tx_path(index as u64);
        let mut proof = self.proof("transactionProof");
        proof["txIndex"] = json!(to_quantity(index as u64));
        proof["merkleProof"] = json!(hex_list(&self.tx_trie.proof(&path)));
        proof
    }
}

/// A state trie with a funded account and a contract with one used slot.
pub struct StateFixture {
    pub number: u64,
    pub header: Vec<u8>,
    accounts: BTreeMap<[u8; 20], AccountState>,
    state: TrieBuilder,
    storage: TrieBuilder,
    slots: BTreeMap<u64, Vec<u8>>,
}

impl StateFixture {
    pub const USER: [u8; 20] = [0xa1; 20];
    pub const CONTRACT: [u8; 20] = [0xc1; 20];
    pub const CODE: &'static [u8] = &[0x60, 0x2a, 0x60, 0x01, 0x55];

    fn slot_key(slot: u64) -> [u8; 32] {
        let mut key = [0u8; 32];
        key[24..].copy_from_slice(&slot.to_be_bytes());
        key
    }

    pub fn new() -> Self {
        let mut slots = BTreeMap::new();
        slots.insert(1u64, vec![0x2a]);
        let mut storage = TrieBuilder::new();
        for (slot, value) in &slots {
            let mut encoded = Vec::new();
            rlp::encode_item(&mut encoded, value);
            storage.insert(&keccak256(&Self::slot_key(*slot)), &encoded);
        }

        let mut accounts = BTreeMap::new();
        accounts.insert(
            Self::USER,
            AccountState {
                nonce: 5,
                balance: u64_to_be_minimal(1_000_000_000_000_000_000),
                storage_root: AccountState::EMPTY_STORAGE_ROOT,
                code_hash: AccountState::EMPTY_CODE_HASH,
            },
        );
        accounts.insert(
            Self::CONTRACT,
            AccountState {
                nonce: 1,
                balance: vec![],
                storage_root: storage.root(),
                code_hash: keccak256(Self::CODE),
            },
        );
        accounts.insert(
            [0x77; 20],
            AccountState {
                nonce: 0,
                balance: vec![7],
                storage_root: AccountState::EMPTY_STORAGE_ROOT,
                code_hash: AccountState::EMPTY_CODE_HASH,
            },
        );

        let mut state = TrieBuilder::new();
        for (address, account) in &accounts {
            state.insert(&keccak256(address), &account.rlp());
        }
        let number = 12_000_000;
        let mut fields = HeaderFields::new(number);
        fields.state_root = state.root();

        Self {
            number,
            header: fields.pow(),
            accounts,
            state,
            storage,
            slots,
        }
    }

    /// `in3.proof` for `address` with storage proofs for `slots`.
    pub fn proof_json(&self, address: &[u8; 20], slots: &[u64]) -> Value {
        let account = self.accounts.get(address).cloned().unwrap_or(AccountState {
            nonce: 0,
            balance: vec![],
            storage_root: AccountState::EMPTY_STORAGE_ROOT,
            code_hash: AccountState::EMPTY_CODE_HASH,
        });
        let has_storage = *address == Self::CONTRACT;
        let storage_proof = slots
            .iter()
            .map(|slot| StorageProof {
                key: u64_to_be_minimal(*slot),
                value: if has_storage {
                    self.slots.get(slot).cloned().unwrap_or_default()
                } else {
                    vec![]
                },
                proof: if has_storage {
                    self.storage.proof(&keccak256(&Self::slot_key(*slot)))
                } else {
                    vec![]
                },
            })
            .collect();
        let proof = AccountProof {
            address: *address,
            account_proof: self.state.proof(&keccak256(address)),
            balance: account.balance,
            code_hash: account.code_hash,
            nonce: u64_to_be_minimal(account.nonce),
            storage_hash: account.storage_root,
            storage_proof,
        };
        let mut accounts = serde_json::Map::new();
        accounts.insert(
            to_hex(address),
            serde_json::to_value(proof).expect("account proof serializes"),
        );
        json!({
            "type": "accountProof",
            "block": to_hex(&self.header),
            "accounts": accounts,
        })
    }
}

impl Default for StateFixture {
    fn default() -> Self {
        Self::new()
    }
}
