//! Federated verification: registered signer nodes vouch for a block hash.

use crate::crypto::{keccak256_concat, recover_address};
use crate::error::{VerifyError, VerifyResult};
use crate::types::SignedBlockHash;
use serde_json::Value;
use tracing::debug;

/// JSON-RPC code a node reports when it could not reach a signer.
const SIGNER_UNREACHABLE: i64 = -32603;

/// Message a signer signs: `keccak(blockHash ‖ u256(number) [‖ registryId])`.
/// Registries from version 2 on bind the signature to their id.
pub fn signed_message(
    block_hash: &[u8; 32],
    number: u64,
    version: u32,
    registry_id: Option<&[u8; 32]>,
) -> [u8; 32] {
    let mut number_word = [0u8; 32];
    number_word[24..].copy_from_slice(&number.to_be_bytes());
    match registry_id {
        Some(id) if version > 1 => keccak256_concat(&[block_hash, &number_word, id]),
        _ => keccak256_concat(&[block_hash, &number_word]),
    }
}

/// Check that every requested signer signed `block_hash` at `number`.
///
/// A signature claiming another block or hash is the responding node's
/// fault, and so is a signer error with any code but internal error.
/// Signatures that are merely absent, or whose signer was unreachable, fail
/// without blacklisting and name the missing signers so the client can
/// track offline nodes instead.
pub fn verify_signatures(
    signatures: &[SignedBlockHash],
    signers: &[[u8; 20]],
    block_hash: &[u8; 32],
    number: u64,
    version: u32,
    registry_id: Option<&[u8; 32]>,
) -> VerifyResult<()> {
    if signatures.is_empty() {
        return Err(VerifyError::missing("no signatures in proof"));
    }
    let message = signed_message(block_hash, number, version, registry_id);
    let mut confirmed = vec![false; signers.len()];

    for sig in signatures {
        if let Some(error) = &sig.error {
            let code = error.get("code").and_then(Value::as_i64);
            if code != Some(SIGNER_UNREACHABLE) {
                return Err(VerifyError::invalid("error not signed"));
            }
            continue;
        }
        if sig.block != number {
            return Err(VerifyError::invalid("wrong signature blocknumber"));
        }
        if sig.block_hash != *block_hash {
            return Err(VerifyError::invalid("wrong signature hash"));
        }
        if sig.msg_hash != [0u8; 32] && sig.msg_hash != message {
            continue;
        }

        let mut rs = [0u8; 64];
        rs[..32].copy_from_slice(&sig.r);
        rs[32..].copy_from_slice(&sig.s);
        let Ok(v) = u8::try_from(sig.v) else { continue };
        let Ok(signer) = recover_address(&message, &rs, v) else { continue };

        if let Some(i) = signers.iter().position(|s| *s == signer) {
            confirmed[i] = true;
        }
    }

    let missing: Vec<[u8; 20]> = signers
        .iter()
        .zip(&confirmed)
        .filter(|(_, ok)| !**ok)
        .map(|(s, _)| *s)
        .collect();
    if !missing.is_empty() {
        debug!(missing = missing.len(), number, "federated signatures incomplete");
        return Err(VerifyError::invalid("missing signatures")
            .without_blacklist()
            .with_missing_signers(missing));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fixtures::eth::{address_of, sign_block_hash, signing_key};
    use serde_json::json;

    const HASH: [u8; 32] = [0x5a; 32];

    #[test]
    fn test_all_signers_confirmed() {
        let keys = [signing_key(1), signing_key(2)];
        let signers: Vec<_> = keys.iter().map(address_of).collect();
        let sigs: Vec<_> = keys
            .iter()
            .map(|k| sign_block_hash(k, &HASH, 77, 2, Some(&[9; 32])))
            .collect();
        verify_signatures(&sigs, &signers, &HASH, 77, 2, Some(&[9; 32])).unwrap();
    }

    #[test]
    fn test_registry_id_binds_signature() {
        let key = signing_key(1);
        let signers = [address_of(&key)];
        let mut sig = sign_block_hash(&key, &HASH, 77, 1, None);
        sig.msg_hash = [0; 32];
        verify_signatures(&[sig.clone()], &signers, &HASH, 77, 1, Some(&[9; 32])).unwrap();
        // version 2 expects the registry id in the message
        let err = verify_signatures(&[sig], &signers, &HASH, 77, 2, Some(&[9; 32])).unwrap_err();
        assert_eq!(err.message, "missing signatures");
    }

    #[test]
    fn test_missing_signature_does_not_blacklist() {
        let keys = [signing_key(1), signing_key(2)];
        let signers: Vec<_> = keys.iter().map(address_of).collect();
        let sigs = vec![sign_block_hash(&keys[0], &HASH, 77, 2, None)];
        let err = verify_signatures(&sigs, &signers, &HASH, 77, 2, None).unwrap_err();
        assert!(!err.blacklists_node());
        assert_eq!(err.missing_signers, vec![signers[1]]);
    }

    #[test]
    fn test_wrong_block_hash_blacklists() {
        let key = signing_key(1);
        let signers = [address_of(&key)];
        let sigs = vec![sign_block_hash(&key, &[0x11; 32], 77, 2, None)];
        let err = verify_signatures(&sigs, &signers, &HASH, 77, 2, None).unwrap_err();
        assert_eq!(err.message, "wrong signature hash");
        assert!(err.blacklists_node());
    }

    #[test]
    fn test_unregistered_signer_ignored() {
        let signers = [address_of(&signing_key(1))];
        let sigs = vec![sign_block_hash(&signing_key(3), &HASH, 77, 2, None)];
        let err = verify_signatures(&sigs, &signers, &HASH, 77, 2, None).unwrap_err();
        assert_eq!(err.missing_signers, signers.to_vec());
    }

    #[test]
    fn test_no_signatures_in_proof() {
        let signers = [address_of(&signing_key(1))];
        let err = verify_signatures(&[], &signers, &HASH, 77, 2, None).unwrap_err();
        assert_eq!(err.message, "no signatures in proof");
        assert_eq!(err.kind, ErrorKind::ProofMissing);
        assert!(err.missing_signers.is_empty());
    }

    #[test]
    fn test_signer_errors() {
        let keys = [signing_key(1), signing_key(2)];
        let signers: Vec<_> = keys.iter().map(address_of).collect();
        let mut offline = sign_block_hash(&keys[1], &HASH, 77, 2, None);
        offline.error = Some(json!({"code": -32603, "message": "signer not reachable"}));
        let sigs = vec![sign_block_hash(&keys[0], &HASH, 77, 2, None), offline.clone()];
        let err = verify_signatures(&sigs, &signers, &HASH, 77, 2, None).unwrap_err();
        assert_eq!(err.message, "missing signatures");
        assert!(!err.blacklists_node());
        assert_eq!(err.missing_signers, vec![signers[1]]);

        let mut refused = offline;
        refused.error = Some(json!({"code": -32000, "message": "block not known"}));
        let sigs = vec![sign_block_hash(&keys[0], &HASH, 77, 2, None), refused];
        let err = verify_signatures(&sigs, &signers, &HASH, 77, 2, None).unwrap_err();
        assert_eq!(err.message, "error not signed");
        assert!(err.blacklists_node());
    }
}
