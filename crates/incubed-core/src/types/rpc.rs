//! JSON-RPC 2.0 wire types plus the `in3` extension objects carried on
//! requests and responses.

use super::execution::AccountProof;
use super::serde_hex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Per-request verification options sent to the node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct In3Request {
    #[serde(with = "serde_hex::quantity")]
    pub chain_id: u64,
    /// `"proof"` or `"none"`.
    pub verification: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub finality: u8,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "serde_hex::addresses"
    )]
    pub signers: Vec<[u8; 20]>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verified_hashes: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub use_full_proof: bool,
}

fn is_zero(v: &u8) -> bool {
    *v == 0
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in3: Option<In3Request>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: 1,
            method: method.into(),
            params,
            in3: None,
        }
    }

    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.get(index)
    }

    /// Identity used to find an already issued sub-request.
    pub fn key(&self) -> String {
        format!("{}{}", self.method, Value::Array(self.params.clone()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// The `in3` object of a response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct In3Response {
    pub proof: Option<Value>,
    #[serde(with = "serde_hex::opt_quantity")]
    pub last_validator_change: Option<u64>,
    #[serde(with = "serde_hex::opt_quantity")]
    pub last_node_list: Option<u64>,
    #[serde(with = "serde_hex::opt_quantity")]
    pub current_block: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in3: Option<In3Response>,
}

impl RpcResponse {
    pub fn success(result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Value::from(1),
            result: Some(result),
            error: None,
            in3: None,
        }
    }

    pub fn with_proof(mut self, proof: Value) -> Self {
        self.in3.get_or_insert_with(In3Response::default).proof = Some(proof);
        self
    }
}

/// A node signature over a block hash, collected for federated verification.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SignedBlockHash {
    #[serde(with = "serde_hex::quantity")]
    pub block: u64,
    #[serde(with = "serde_hex::fixed")]
    pub block_hash: [u8; 32],
    #[serde(with = "serde_hex::fixed")]
    pub msg_hash: [u8; 32],
    #[serde(with = "serde_hex::fixed")]
    pub r: [u8; 32],
    #[serde(with = "serde_hex::fixed")]
    pub s: [u8; 32],
    #[serde(with = "serde_hex::quantity")]
    pub v: u64,
    /// Set when the node could not obtain this signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// `in3.proof` of an ethereum response. Which fields are present depends on
/// the method.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EthProof {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(with = "serde_hex::opt_bytes")]
    pub block: Option<Vec<u8>>,
    #[serde(with = "serde_hex::bytes_list")]
    pub finality_blocks: Vec<Vec<u8>>,
    #[serde(with = "serde_hex::bytes_list")]
    pub merkle_proof: Vec<Vec<u8>>,
    #[serde(with = "serde_hex::bytes_list")]
    pub tx_proof: Vec<Vec<u8>>,
    #[serde(with = "serde_hex::opt_quantity")]
    pub tx_index: Option<u64>,
    #[serde(with = "serde_hex::opt_quantity")]
    pub log_index: Option<u64>,
    /// Raw transactions (hex) of a block, or full transaction objects.
    pub transactions: Vec<Value>,
    #[serde(with = "serde_hex::bytes_list")]
    pub uncles: Vec<Vec<u8>>,
    pub signatures: Vec<SignedBlockHash>,
    pub accounts: BTreeMap<String, AccountProof>,
}

/// `in3.proof` of a bitcoin response, also the element type of a
/// `btc_proofTarget` result.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BtcProof {
    #[serde(with = "serde_hex::opt_quantity")]
    pub dap: Option<u64>,
    #[serde(with = "serde_hex::opt_bytes")]
    pub block: Option<Vec<u8>>,
    /// Concatenated 80-byte headers following the proven block.
    #[serde(rename = "final", with = "serde_hex::opt_bytes")]
    pub final_headers: Option<Vec<u8>>,
    #[serde(with = "serde_hex::opt_bytes")]
    pub cbtx: Option<Vec<u8>>,
    #[serde(with = "serde_hex::opt_bytes")]
    pub cbtx_merkle_proof: Option<Vec<u8>>,
    #[serde(with = "serde_hex::opt_bytes")]
    pub merkle_proof: Option<Vec<u8>>,
    #[serde(with = "serde_hex::opt_quantity")]
    pub tx_index: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization_skips_defaults() {
        let mut req = RpcRequest::new("eth_getBalance", vec![json!("0x00"), json!("latest")]);
        req.in3 = Some(In3Request {
            chain_id: 1,
            verification: "proof".into(),
            ..Default::default()
        });
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["in3"], json!({"chainId": "0x1", "verification": "proof"}));
        assert_eq!(req.key(), r#"eth_getBalance["0x00","latest"]"#);
    }

    #[test]
    fn test_parse_response_with_proof() {
        let resp: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": "0x1",
            "in3": {
                "lastValidatorChange": 12,
                "proof": {"type": "receiptProof", "block": "0xc0", "txIndex": 3, "merkleProof": ["0x80"]}
            }
        }))
        .unwrap();
        let in3 = resp.in3.unwrap();
        assert_eq!(in3.last_validator_change, Some(12));
        let proof: EthProof = serde_json::from_value(in3.proof.unwrap()).unwrap();
        assert_eq!(proof.block, Some(vec![0xc0]));
        assert_eq!(proof.tx_index, Some(3));
        assert_eq!(proof.merkle_proof, vec![vec![0x80]]);
        assert!(proof.signatures.is_empty());
    }

    #[test]
    fn test_parse_error_response() {
        let resp: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"boom"}}"#)
                .unwrap();
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, -32000);
    }
}
