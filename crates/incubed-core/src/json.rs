//! Field access on JSON-RPC results. Missing or malformed fields become
//! `ProofInvalid` errors naming the field.

use crate::bytes;
use crate::error::{VerifyError, VerifyResult};
use serde_json::Value;

fn missing(key: &str) -> VerifyError {
    VerifyError::invalid(format!("missing {} in result", key))
}

pub fn str_field<'a>(obj: &'a Value, key: &str) -> VerifyResult<&'a str> {
    obj.get(key).and_then(|v| v.as_str()).ok_or_else(|| missing(key))
}

pub fn opt_str<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(|v| v.as_str())
}

pub fn bytes_field(obj: &Value, key: &str) -> VerifyResult<Vec<u8>> {
    Ok(bytes::parse_hex(str_field(obj, key)?)?)
}

pub fn opt_bytes(obj: &Value, key: &str) -> VerifyResult<Option<Vec<u8>>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(bytes::parse_hex(s)?)),
        Some(_) => Err(VerifyError::invalid(format!("{} must be a hex string", key))),
    }
}

pub fn hash_field(obj: &Value, key: &str) -> VerifyResult<[u8; 32]> {
    Ok(bytes::hex_to_bytes32(str_field(obj, key)?)?)
}

/// A quantity given as a JSON number or hex string.
pub fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) if s.starts_with("0x") => bytes::parse_quantity(s).ok(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn u64_field(obj: &Value, key: &str) -> VerifyResult<u64> {
    let value = obj.get(key).ok_or_else(|| missing(key))?;
    as_u64(value).ok_or_else(|| VerifyError::invalid(format!("{} is not a quantity", key)))
}

pub fn opt_u64(obj: &Value, key: &str) -> Option<u64> {
    obj.get(key).and_then(as_u64)
}

/// A hex string parameter, e.g. a transaction hash.
pub fn param_bytes(params: &[Value], index: usize) -> VerifyResult<Vec<u8>> {
    let s = params
        .get(index)
        .and_then(|v| v.as_str())
        .ok_or_else(|| VerifyError::invalid(format!("missing parameter {}", index)))?;
    Ok(bytes::parse_hex(s)?)
}

pub fn param_hash(params: &[Value], index: usize) -> VerifyResult<[u8; 32]> {
    bytes::to_bytes32(&param_bytes(params, index)?)
        .ok_or_else(|| VerifyError::invalid(format!("parameter {} is not a 32 byte hash", index)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_access() {
        let obj = json!({"number": "0x10", "index": 3, "hash": format!("0x{}", "ab".repeat(32)), "to": null});
        assert_eq!(u64_field(&obj, "number").unwrap(), 16);
        assert_eq!(u64_field(&obj, "index").unwrap(), 3);
        assert_eq!(hash_field(&obj, "hash").unwrap(), [0xab; 32]);
        assert_eq!(opt_bytes(&obj, "to").unwrap(), None);
        assert_eq!(
            u64_field(&obj, "gas").unwrap_err().to_string(),
            "missing gas in result"
        );
    }
}
