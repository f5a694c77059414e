//! IPFS content verification: the content of `ipfs_get`/`ipfs_put` is
//! wrapped into a single UnixFS file node and hashed to a CIDv0.

use crate::crypto::sha256;
use crate::error::{VerifyError, VerifyResult};
use crate::verifier::{VerificationContext, Verdict};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Multihash code and length prefix of sha2-256.
const SHA2_256_PREFIX: [u8; 2] = [0x12, 0x20];
const UNIXFS_FILE: u64 = 2;

/// Content encodings accepted by `ipfs_get` / `ipfs_put`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Hex,
    Utf8,
    Base64,
}

impl Encoding {
    pub fn parse(name: &str) -> VerifyResult<Self> {
        match name {
            "hex" => Ok(Encoding::Hex),
            "utf8" => Ok(Encoding::Utf8),
            "base64" => Ok(Encoding::Base64),
            other => Err(VerifyError::unsupported(format!("unsupported encoding {}", other))),
        }
    }

    pub fn decode(self, content: &str) -> VerifyResult<Vec<u8>> {
        match self {
            Encoding::Hex => Ok(crate::bytes::parse_hex(content)?),
            Encoding::Utf8 => Ok(content.as_bytes().to_vec()),
            Encoding::Base64 => STANDARD
                .decode(content)
                .map_err(|e| VerifyError::invalid(format!("invalid base64 content: {}", e))),
        }
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn write_bytes_field(out: &mut Vec<u8>, field: u64, data: &[u8]) {
    write_varint(out, field << 3 | 2);
    write_varint(out, data.len() as u64);
    out.extend_from_slice(data);
}

/// dag-pb node holding a UnixFS `File` with the whole content.
fn dag_node(content: &[u8]) -> Vec<u8> {
    let mut unixfs = Vec::with_capacity(content.len() + 16);
    write_varint(&mut unixfs, 1 << 3);
    write_varint(&mut unixfs, UNIXFS_FILE);
    if !content.is_empty() {
        write_bytes_field(&mut unixfs, 2, content);
    }
    write_varint(&mut unixfs, 3 << 3);
    write_varint(&mut unixfs, content.len() as u64);

    let mut node = Vec::with_capacity(unixfs.len() + 8);
    write_bytes_field(&mut node, 1, &unixfs);
    node
}

/// Base58 CIDv0 of `content`.
pub fn content_hash(content: &[u8]) -> String {
    let mut multihash = SHA2_256_PREFIX.to_vec();
    multihash.extend_from_slice(&sha256(&dag_node(content)));
    bs58::encode(multihash).into_string()
}

pub fn verify(ctx: &VerificationContext<'_>) -> VerifyResult<Verdict> {
    if ctx.result.is_null() {
        return Ok(Verdict::Verified);
    }
    let result = ctx
        .result
        .as_str()
        .ok_or_else(|| VerifyError::invalid("Invalid response!"))?;
    let param = |i: usize| ctx.params().get(i).and_then(|v| v.as_str());
    let encoding = Encoding::parse(param(1).unwrap_or("base64"))?;

    let (content, hash) = match ctx.method() {
        "ipfs_get" => (result, param(0)),
        "ipfs_put" => (param(0).unwrap_or_default(), Some(result)),
        other => {
            return Err(VerifyError::unsupported(format!(
                "method {} cannot be verified with ipfs verifier!",
                other
            )))
        }
    };
    let hash = hash.ok_or_else(|| VerifyError::invalid("missing ipfs hash"))?;
    if content_hash(&encoding.decode(content)?) != hash {
        return Err(VerifyError::invalid("Invalid ipfs hash"));
    }
    Ok(Verdict::Verified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RpcRequest;
    use serde_json::json;

    const HELLO: &str = "Qmf412jQZiuVUtdgnB36FXFX7xg5V6KEbSJ4dpQuhkLyfD";

    #[test]
    fn test_known_hashes() {
        assert_eq!(content_hash(b""), "QmbFMke1KXqnYyBBWxB74N4c5SBnJMVAiMNRcGu6x1AwQH");
        assert_eq!(content_hash(b"hello world"), HELLO);
    }

    #[test]
    fn test_get_in_every_encoding() {
        for (encoding, content) in [
            ("utf8", "hello world"),
            ("hex", "0x68656c6c6f20776f726c64"),
            ("base64", "aGVsbG8gd29ybGQ="),
        ] {
            let request = RpcRequest::new("ipfs_get", vec![json!(HELLO), json!(encoding)]);
            let result = json!(content);
            let ctx = VerificationContext::new(&request, &result, None);
            assert_eq!(verify(&ctx).unwrap(), Verdict::Verified, "{}", encoding);
        }
    }

    #[test]
    fn test_tampered_content_rejected() {
        let request = RpcRequest::new("ipfs_get", vec![json!(HELLO), json!("utf8")]);
        let result = json!("hello world!");
        let ctx = VerificationContext::new(&request, &result, None);
        assert_eq!(verify(&ctx).unwrap_err().message, "Invalid ipfs hash");
    }

    #[test]
    fn test_put_checks_returned_hash() {
        let request = RpcRequest::new("ipfs_put", vec![json!("aGVsbG8gd29ybGQ=")]);
        let ok = json!(HELLO);
        assert!(verify(&VerificationContext::new(&request, &ok, None)).is_ok());
        let wrong = json!("QmbFMke1KXqnYyBBWxB74N4c5SBnJMVAiMNRcGu6x1AwQH");
        assert!(verify(&VerificationContext::new(&request, &wrong, None)).is_err());
    }

    #[test]
    fn test_unknown_encoding_unsupported() {
        let request = RpcRequest::new("ipfs_get", vec![json!(HELLO), json!("latin1")]);
        let result = json!("hello world");
        let err = verify(&VerificationContext::new(&request, &result, None)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Unsupported);
    }
}
