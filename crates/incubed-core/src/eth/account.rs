//! Account state methods, proven through `eth_getProof` shaped account and
//! storage proofs against the header's state root.

use super::{proof_block, EthVerifier};
use crate::bytes;
use crate::crypto::keccak256;
use crate::error::{VerifyError, VerifyResult};
use crate::json;
use crate::rlp;
use crate::trie::{self, Expected};
use crate::types::{AccountProof, EthProof};
use crate::verifier::{ChainState, Verdict, VerificationContext};

pub fn verify(eth: &EthVerifier, ctx: &VerificationContext<'_>, state: &mut ChainState) -> VerifyResult<Verdict> {
    let params = ctx.params();
    let proof: EthProof = ctx.proof()?;
    let address = bytes::hex_to_address(
        params
            .first()
            .and_then(|p| p.as_str())
            .ok_or_else(|| VerifyError::invalid("missing address parameter"))?,
    )?;
    let header = eth.verify_header(ctx, state, &proof, proof_block(&proof)?, None)?;

    if let Some(number) = params.last().and_then(json::as_u64) {
        if params.len() > 1 && header.number()? != number {
            return Err(VerifyError::invalid(
                "the blocknumber in the proof does not match the requested block",
            ));
        }
    }

    let state_root = header.state_root()?;
    for account in proof.accounts.values() {
        verify_account(&state_root, account)?;
    }
    let account = proof
        .accounts
        .values()
        .find(|a| a.address == address)
        .ok_or_else(|| VerifyError::invalid("the proof is missing the requested account"))?;

    let result = ctx.result;
    let matches = match ctx.method() {
        "eth_getBalance" => {
            bytes::strip_leading_zeros(&json_bytes(result)?) == bytes::strip_leading_zeros(&account.balance)
        }
        "eth_getTransactionCount" => nonce_matches(result, &account.nonce),
        "eth_getCode" => keccak256(&json_bytes(result)?) == account.code_hash,
        "eth_getStorageAt" => {
            let key = json::param_bytes(params, 1)?;
            let slot = account
                .storage(&key)
                .ok_or_else(|| VerifyError::invalid("missing storage proof"))?;
            bytes::strip_leading_zeros(&json_bytes(result)?) == bytes::strip_leading_zeros(&slot.value)
        }
        other => {
            return Err(VerifyError::unsupported(format!(
                "{} is not an account method",
                other
            )))
        }
    };
    if !matches {
        return Err(VerifyError::invalid(format!(
            "the result of {} does not match the proven account",
            ctx.method()
        )));
    }
    Ok(Verdict::Verified)
}

fn nonce_matches(result: &serde_json::Value, nonce: &[u8]) -> bool {
    match (json::as_u64(result), bytes::be_to_u64(nonce)) {
        (Some(claimed), Some(proven)) => claimed == proven,
        _ => false,
    }
}

fn json_bytes(value: &serde_json::Value) -> VerifyResult<Vec<u8>> {
    let s = value
        .as_str()
        .ok_or_else(|| VerifyError::invalid("the result must be a hex string"))?;
    Ok(bytes::parse_hex(s)?)
}

/// Prove the account (or its absence) in `state_root` and every listed
/// storage slot in the account's storage root.
pub fn verify_account(state_root: &[u8; 32], account: &AccountProof) -> VerifyResult<()> {
    let state = account.state()?;
    let encoded = state.rlp();
    let expected = if state.is_empty() {
        Expected::Absent
    } else {
        Expected::Value(&encoded)
    };
    trie::verify_proof(
        state_root,
        &keccak256(&account.address),
        &account.account_proof,
        expected,
    )
    .map_err(|e| {
        VerifyError::from(e).context(&format!(
            "invalid account proof for {}",
            bytes::to_hex(&account.address)
        ))
    })?;

    for slot in &account.storage_proof {
        let key = bytes::to_bytes32(&slot.key)
            .ok_or_else(|| VerifyError::invalid("storage key longer than 32 bytes"))?;
        let value = bytes::strip_leading_zeros(&slot.value);
        let mut encoded = Vec::with_capacity(value.len() + 1);
        rlp::encode_item(&mut encoded, value);
        let expected = if value.is_empty() {
            Expected::Absent
        } else {
            Expected::Value(&encoded)
        };
        trie::verify_proof(&account.storage_hash, &keccak256(&key), &slot.proof, expected)
            .map_err(|e| VerifyError::from(e).context("invalid storage proof"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fixtures::eth::StateFixture;
    use crate::types::{ChainSpec, Consensus, In3Response, RpcRequest};
    use serde_json::{json, Value};

    fn run(method: &str, params: Vec<Value>, result: Value, proof: Value) -> VerifyResult<Verdict> {
        let spec = ChainSpec::ethereum(1, Consensus::ProofOfWork);
        let eth = EthVerifier::new(&spec);
        let mut state = ChainState::for_chain(&spec, 5);
        let request = RpcRequest::new(method, params);
        let in3 = In3Response {
            proof: Some(proof),
            ..Default::default()
        };
        let ctx = VerificationContext::new(&request, &result, Some(&in3));
        eth.verify(&ctx, &mut state)
    }

    #[test]
    fn test_balance_and_nonce() {
        let fixture = StateFixture::new();
        let user = bytes::to_hex(&StateFixture::USER);
        let proof = fixture.proof_json(&StateFixture::USER, &[]);
        let balance = run("eth_getBalance", vec![json!(user), json!("latest")], json!("0xde0b6b3a7640000"), proof.clone());
        assert_eq!(balance.unwrap(), Verdict::Verified);
        let nonce = run("eth_getTransactionCount", vec![json!(user), json!("latest")], json!("0x5"), proof.clone());
        assert_eq!(nonce.unwrap(), Verdict::Verified);

        let err = run("eth_getBalance", vec![json!(user), json!("latest")], json!("0x1"), proof).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProofInvalid);
    }

    #[test]
    fn test_requested_block_number_checked() {
        let fixture = StateFixture::new();
        let user = bytes::to_hex(&StateFixture::USER);
        let proof = fixture.proof_json(&StateFixture::USER, &[]);
        let at = bytes::to_quantity(fixture.number);
        let ok = run("eth_getBalance", vec![json!(user), json!(at)], json!("0xde0b6b3a7640000"), proof.clone());
        assert!(ok.is_ok());
        let err = run("eth_getBalance", vec![json!(user), json!("0x1")], json!("0xde0b6b3a7640000"), proof)
            .unwrap_err();
        assert_eq!(err.message, "the blocknumber in the proof does not match the requested block");
    }

    #[test]
    fn test_code_and_storage() {
        let fixture = StateFixture::new();
        let contract = bytes::to_hex(&StateFixture::CONTRACT);
        let proof = fixture.proof_json(&StateFixture::CONTRACT, &[1, 2]);
        let code = run("eth_getCode", vec![json!(contract), json!("latest")], json!(bytes::to_hex(StateFixture::CODE)), proof.clone());
        assert_eq!(code.unwrap(), Verdict::Verified);

        let slot = run("eth_getStorageAt", vec![json!(contract), json!("0x1"), json!("latest")], json!("0x2a"), proof.clone());
        assert_eq!(slot.unwrap(), Verdict::Verified);
        // slot 2 is empty, proven by absence
        let empty = run("eth_getStorageAt", vec![json!(contract), json!("0x2"), json!("latest")], json!("0x0"), proof.clone());
        assert_eq!(empty.unwrap(), Verdict::Verified);

        let err = run("eth_getStorageAt", vec![json!(contract), json!("0x1"), json!("latest")], json!("0x2b"), proof)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProofInvalid);
    }

    #[test]
    fn test_absent_account() {
        let fixture = StateFixture::new();
        let nobody = [0x99; 20];
        let proof = fixture.proof_json(&nobody, &[]);
        let verdict = run("eth_getBalance", vec![json!(bytes::to_hex(&nobody)), json!("latest")], json!("0x0"), proof);
        assert_eq!(verdict.unwrap(), Verdict::Verified);
    }

    #[test]
    fn test_forged_account_balance() {
        let fixture = StateFixture::new();
        let user = bytes::to_hex(&StateFixture::USER);
        let mut proof = fixture.proof_json(&StateFixture::USER, &[]);
        proof["accounts"][&user]["balance"] = json!("0x1bc16d674ec80000");
        let err = run("eth_getBalance", vec![json!(user), json!("latest")], json!("0x1bc16d674ec80000"), proof)
            .unwrap_err();
        assert!(err.message.starts_with("invalid account proof"));
    }

    #[test]
    fn test_missing_proof_checked_first() {
        let spec = ChainSpec::ethereum(1, Consensus::ProofOfWork);
        let eth = EthVerifier::new(&spec);
        let mut state = ChainState::for_chain(&spec, 5);
        let request = RpcRequest::new("eth_getBalance", vec![json!("0x00"), json!("latest")]);
        let result = json!("0x1");
        let ctx = VerificationContext::new(&request, &result, None);
        assert_eq!(eth.verify(&ctx, &mut state).unwrap_err().kind, ErrorKind::ProofMissing);
    }

    #[test]
    fn test_nonce_must_be_readable() {
        assert!(nonce_matches(&json!("0x5"), &[5]));
        assert!(nonce_matches(&json!("0x0"), &[]));
        assert!(!nonce_matches(&json!("0x6"), &[5]));
        let huge = [1u8; 9];
        assert!(!nonce_matches(&json!("not a number"), &huge));
        assert!(!nonce_matches(&json!("0x1"), &huge));
    }
}
