//! Canonical RLP encodings rebuilt from JSON-RPC results, so the result can
//! be hashed and compared with what the proof commits to.

use crate::bytes;
use crate::error::{VerifyError, VerifyResult};
use crate::json;
use crate::rlp;
use serde_json::Value;

/// Appends JSON fields to an RLP list payload.
struct Fields<'a> {
    obj: &'a Value,
    payload: Vec<u8>,
}

impl<'a> Fields<'a> {
    fn new(obj: &'a Value) -> Self {
        Self {
            obj,
            payload: Vec::with_capacity(512),
        }
    }

    /// First present key of `keys`.
    fn lookup(&self, keys: &[&str]) -> VerifyResult<&'a str> {
        keys.iter()
            .find_map(|k| json::opt_str(self.obj, k))
            .ok_or_else(|| VerifyError::invalid(format!("missing {} in result", keys[0])))
    }

    fn bytes(&mut self, keys: &[&str]) -> VerifyResult<&mut Self> {
        let data = bytes::parse_hex(self.lookup(keys)?)?;
        rlp::encode_item(&mut self.payload, &data);
        Ok(self)
    }

    fn uint(&mut self, keys: &[&str]) -> VerifyResult<&mut Self> {
        let data = bytes::parse_hex(self.lookup(keys)?)?;
        rlp::encode_item(&mut self.payload, bytes::strip_leading_zeros(&data));
        Ok(self)
    }

    /// `to` of a contract creation is `null` and encodes as empty bytes.
    fn address_or_empty(&mut self, key: &str) -> VerifyResult<&mut Self> {
        let data = json::opt_bytes(self.obj, key)?.unwrap_or_default();
        rlp::encode_item(&mut self.payload, &data);
        Ok(self)
    }

    fn opt_uint(&mut self, key: &str) -> VerifyResult<&mut Self> {
        if json::opt_str(self.obj, key).is_some() {
            self.uint(&[key])?;
        }
        Ok(self)
    }

    fn opt_bytes(&mut self, key: &str) -> VerifyResult<&mut Self> {
        if json::opt_str(self.obj, key).is_some() {
            self.bytes(&[key])?;
        }
        Ok(self)
    }

    fn raw(&mut self, encoded: &[u8]) -> &mut Self {
        self.payload.extend_from_slice(encoded);
        self
    }

    fn finish(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 9);
        rlp::encode_list(&mut out, &self.payload);
        out
    }
}

/// RLP header of a block result. Aura chains deliver their seal as
/// `sealFields` (already RLP encoded), PoW chains as `mixHash` + `nonce`.
pub fn header_from_json(block: &Value) -> VerifyResult<Vec<u8>> {
    let mut f = Fields::new(block);
    f.bytes(&["parentHash"])?
        .bytes(&["sha3Uncles"])?
        .bytes(&["miner", "coinbase"])?
        .bytes(&["stateRoot"])?
        .bytes(&["transactionsRoot"])?
        .bytes(&["receiptsRoot", "receiptRoot"])?
        .bytes(&["logsBloom"])?
        .uint(&["difficulty"])?
        .uint(&["number"])?
        .uint(&["gasLimit"])?
        .uint(&["gasUsed"])?
        .uint(&["timestamp"])?
        .bytes(&["extraData"])?;

    match block.get("sealFields").and_then(|s| s.as_array()) {
        Some(seal) => {
            for field in seal {
                let raw = field
                    .as_str()
                    .ok_or_else(|| VerifyError::invalid("sealFields must be hex strings"))?;
                f.raw(&bytes::parse_hex(raw)?);
            }
        }
        None => {
            f.bytes(&["mixHash"])?.bytes(&["nonce"])?;
        }
    }

    f.opt_uint("baseFeePerGas")?
        .opt_bytes("withdrawalsRoot")?
        .opt_uint("blobGasUsed")?
        .opt_uint("excessBlobGas")?
        .opt_bytes("parentBeaconBlockRoot")?;
    Ok(f.finish())
}

fn type_of(obj: &Value) -> VerifyResult<u64> {
    match obj.get("type") {
        None | Some(Value::Null) => Ok(0),
        Some(v) => json::as_u64(v).ok_or_else(|| VerifyError::invalid("invalid type")),
    }
}

fn with_type_prefix(tx_type: u64, body: Vec<u8>) -> Vec<u8> {
    if tx_type == 0 {
        return body;
    }
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(tx_type as u8);
    out.extend_from_slice(&body);
    out
}

fn encode_logs(logs: &[Value]) -> VerifyResult<Vec<u8>> {
    let mut payload = Vec::new();
    for log in logs {
        let mut topics = Vec::new();
        for topic in log.get("topics").and_then(|t| t.as_array()).into_iter().flatten() {
            let topic = topic
                .as_str()
                .ok_or_else(|| VerifyError::invalid("log topics must be hex strings"))?;
            rlp::encode_item(&mut topics, &bytes::hex_to_bytes32(topic)?);
        }
        let mut f = Fields::new(log);
        f.bytes(&["address"])?;
        let mut encoded_topics = Vec::new();
        rlp::encode_list(&mut encoded_topics, &topics);
        f.raw(&encoded_topics).bytes(&["data"])?;
        payload.extend_from_slice(&f.finish());
    }
    let mut out = Vec::with_capacity(payload.len() + 9);
    rlp::encode_list(&mut out, &payload);
    Ok(out)
}

/// Receipt trie value of an `eth_getTransactionReceipt` result.
pub fn receipt_from_json(receipt: &Value) -> VerifyResult<Vec<u8>> {
    let tx_type = type_of(receipt)?;
    let mut f = Fields::new(receipt);
    if json::opt_str(receipt, "status").is_some() {
        f.uint(&["status"])?;
    } else {
        f.bytes(&["root"])?;
    }
    f.uint(&["cumulativeGasUsed"])?.bytes(&["logsBloom"])?;

    let logs = receipt
        .get("logs")
        .and_then(|l| l.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();
    f.raw(&encode_logs(logs)?);
    Ok(with_type_prefix(tx_type, f.finish()))
}

fn encode_access_list(tx: &Value) -> VerifyResult<Vec<u8>> {
    let mut payload = Vec::new();
    for entry in tx.get("accessList").and_then(|a| a.as_array()).into_iter().flatten() {
        let mut keys = Vec::new();
        for key in entry.get("storageKeys").and_then(|k| k.as_array()).into_iter().flatten() {
            let key = key
                .as_str()
                .ok_or_else(|| VerifyError::invalid("storage keys must be hex strings"))?;
            rlp::encode_item(&mut keys, &bytes::hex_to_bytes32(key)?);
        }
        let mut encoded_keys = Vec::new();
        rlp::encode_list(&mut encoded_keys, &keys);
        let mut f = Fields::new(entry);
        f.bytes(&["address"])?.raw(&encoded_keys);
        payload.extend_from_slice(&f.finish());
    }
    let mut out = Vec::with_capacity(payload.len() + 9);
    rlp::encode_list(&mut out, &payload);
    Ok(out)
}

/// Signed transaction encoding (the transactions trie value) of a
/// transaction object. Legacy, access list, dynamic fee and blob
/// transactions are supported.
pub fn tx_from_json(tx: &Value) -> VerifyResult<Vec<u8>> {
    let tx_type = type_of(tx)?;
    let mut f = Fields::new(tx);
    match tx_type {
        0 => {
            f.uint(&["nonce"])?
                .uint(&["gasPrice"])?
                .uint(&["gas", "gasLimit"])?
                .address_or_empty("to")?
                .uint(&["value"])?
                .bytes(&["input", "data"])?;
        }
        1 => {
            f.uint(&["chainId"])?
                .uint(&["nonce"])?
                .uint(&["gasPrice"])?
                .uint(&["gas", "gasLimit"])?
                .address_or_empty("to")?
                .uint(&["value"])?
                .bytes(&["input", "data"])?
                .raw(&encode_access_list(tx)?);
        }
        2 | 3 => {
            f.uint(&["chainId"])?
                .uint(&["nonce"])?
                .uint(&["maxPriorityFeePerGas"])?
                .uint(&["maxFeePerGas"])?
                .uint(&["gas", "gasLimit"])?
                .address_or_empty("to")?
                .uint(&["value"])?
                .bytes(&["input", "data"])?
                .raw(&encode_access_list(tx)?);
            if tx_type == 3 {
                f.uint(&["maxFeePerBlobGas"])?;
                let mut hashes = Vec::new();
                for hash in tx
                    .get("blobVersionedHashes")
                    .and_then(|h| h.as_array())
                    .into_iter()
                    .flatten()
                {
                    let hash = hash
                        .as_str()
                        .ok_or_else(|| VerifyError::invalid("blob hashes must be hex strings"))?;
                    rlp::encode_item(&mut hashes, &bytes::hex_to_bytes32(hash)?);
                }
                let mut encoded = Vec::new();
                rlp::encode_list(&mut encoded, &hashes);
                f.raw(&encoded);
            }
        }
        other => {
            return Err(VerifyError::unsupported(format!(
                "transaction type {} is not supported",
                other
            )))
        }
    }
    if tx_type == 0 {
        f.uint(&["v"])?;
    } else {
        f.uint(&["yParity", "v"])?;
    }
    f.uint(&["r"])?.uint(&["s"])?;
    Ok(with_type_prefix(tx_type, f.finish()))
}
