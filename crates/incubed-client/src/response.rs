//! JSON-RPC responses: reading what nodes send, building what callers get.
//!
//! NEVER hand an unverified result to the caller. Every result leaving this
//! crate either went through the verification engine or is answered locally
//! from the configuration.

use crate::error::ClientError;
use incubed_core::{RpcError, RpcResponse};
use serde_json::Value;

/// Methods answered from the configuration without asking a node.
pub const LOCAL_METHODS: &[&str] = &["eth_chainId", "net_version", "web3_clientVersion"];

/// Prefix nodes put on errors that are their own fault.
const SYSTEM_ERROR_PREFIX: &str = "Error:";

/// Whether a node error is the node's fault rather than the caller's.
pub fn is_system_error(error: &RpcError) -> bool {
    error.message.starts_with(SYSTEM_ERROR_PREFIX)
}

/// Parse a node's answer. Batch answers are accepted when they carry a
/// single response.
pub fn parse_node_response(data: &str) -> Result<RpcResponse, String> {
    let value: Value = serde_json::from_str(data).map_err(|e| format!("invalid json response: {}", e))?;
    let value = match value {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        Value::Array(items) => {
            return Err(format!("expected one response, got {}", items.len()));
        }
        other => other,
    };
    // a `null` result deserializes to `None`, so look at the raw keys
    let answered = value.get("result").is_some() || value.get("error").is_some();
    let response: RpcResponse =
        serde_json::from_value(value).map_err(|e| format!("invalid json-rpc response: {}", e))?;
    if !answered {
        return Err("response carries neither result nor error".into());
    }
    Ok(response)
}

/// Answer a local method from the chain id in use.
pub fn handle_local_method(method: &str, chain_id: u64) -> Option<Value> {
    match method {
        "eth_chainId" => Some(Value::String(format!("0x{:x}", chain_id))),
        "net_version" => Some(Value::String(chain_id.to_string())),
        "web3_clientVersion" => Some(Value::String(format!(
            "incubed/{}",
            env!("CARGO_PKG_VERSION")
        ))),
        _ => None,
    }
}

/// Create a success response.
pub fn success_response(id: Value, result: Value) -> RpcResponse {
    RpcResponse {
        id,
        ..RpcResponse::success(result)
    }
}

/// Create an error response for a failed request.
pub fn error_response(id: Value, error: &ClientError) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: None,
        error: Some(error.to_rpc_error()),
        in3: None,
    }
}
