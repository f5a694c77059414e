//! Block lookups: the header is rebuilt from the JSON result, the
//! transactions root from the block's transactions.

use super::header::BlockHeader;
use super::{proof_block, serialize, EthVerifier};
use crate::bytes;
use crate::crypto::keccak256;
use crate::error::{VerifyError, VerifyResult};
use crate::json;
use crate::rlp;
use crate::trie::TrieBuilder;
use crate::types::EthProof;
use crate::verifier::{ChainState, Verdict, VerificationContext};
use serde_json::Value;

/// `eth_getBlockByHash` / `eth_getBlockByNumber`
pub fn verify(eth: &EthVerifier, ctx: &VerificationContext<'_>, state: &mut ChainState) -> VerifyResult<Verdict> {
    let result = ctx.result;
    let params = ctx.params();
    let block_hash = json::hash_field(result, "hash")?;
    if ctx.method() == "eth_getBlockByHash" {
        if json::param_hash(params, 0)? != block_hash {
            return Err(VerifyError::invalid("wrong blockhash"));
        }
    } else if let Some(number) = params.first().and_then(json::as_u64) {
        if json::u64_field(result, "number")? != number {
            return Err(VerifyError::invalid("wrong blocknumber"));
        }
    }

    let proof: EthProof = ctx.proof()?;
    let raw_header = serialize::header_from_json(result)?;
    let header = eth.verify_header(ctx, state, &proof, &raw_header, Some(&block_hash))?;

    if let (Some(miner), Some(author)) = (json::opt_str(result, "miner"), json::opt_str(result, "author")) {
        if bytes::parse_hex(miner)? != bytes::parse_hex(author)? {
            return Err(VerifyError::invalid("invalid author"));
        }
    }

    let transactions = block_transactions(result, &proof)?;
    check_transactions_root(&header, &transactions)?;

    if ctx.use_full_proof {
        check_uncles(result, &header, &proof)?;
    }
    Ok(Verdict::Verified)
}

/// `eth_getBlockTransactionCountByHash` / `...ByNumber`
pub fn verify_transaction_count(eth: &EthVerifier, ctx: &VerificationContext<'_>, state: &mut ChainState) -> VerifyResult<Verdict> {
    let params = ctx.params();
    let proof: EthProof = ctx.proof()?;
    let expected = match ctx.method() {
        "eth_getBlockTransactionCountByHash" => Some(json::param_hash(params, 0)?),
        _ => None,
    };
    let header = eth.verify_header(ctx, state, &proof, proof_block(&proof)?, expected.as_ref())?;
    if expected.is_none() {
        if let Some(number) = params.first().and_then(json::as_u64) {
            if header.number()? != number {
                return Err(VerifyError::invalid("wrong blocknumber"));
            }
        }
    }

    let transactions = raw_transactions(&proof)?;
    let count = json::as_u64(ctx.result).ok_or_else(|| VerifyError::invalid("invalid count"))?;
    if count != transactions.len() as u64 {
        return Err(VerifyError::invalid("wrong number of transactions"));
    }
    check_transactions_root(&header, &transactions)?;
    Ok(Verdict::Verified)
}

fn raw_transactions(proof: &EthProof) -> VerifyResult<Vec<Vec<u8>>> {
    proof
        .transactions
        .iter()
        .map(|tx| {
            let tx = tx
                .as_str()
                .ok_or_else(|| VerifyError::invalid("proof transactions must be raw hex"))?;
            Ok(bytes::parse_hex(tx)?)
        })
        .collect()
}

/// Signed transactions of the block in order. Full transaction objects are
/// serialized from the result; hash-only results take the raw transactions
/// from the proof, which must hash to the listed hashes.
fn block_transactions(result: &Value, proof: &EthProof) -> VerifyResult<Vec<Vec<u8>>> {
    let listed = match result.get("transactions") {
        Some(Value::Array(txs)) => txs.as_slice(),
        _ => return Err(VerifyError::invalid("missing transactions in result")),
    };

    let mut out = Vec::with_capacity(listed.len());
    if listed.iter().all(Value::is_object) {
        for tx in listed {
            let raw = serialize::tx_from_json(tx)?;
            if keccak256(&raw) != json::hash_field(tx, "hash")? {
                return Err(VerifyError::invalid("wrong transaction hash"));
            }
            out.push(raw);
        }
        return Ok(out);
    }

    let raw = raw_transactions(proof)?;
    if raw.len() != listed.len() {
        return Err(VerifyError::missing("the proof does not contain all transactions"));
    }
    for (tx, hash) in raw.into_iter().zip(listed) {
        let hash = hash
            .as_str()
            .ok_or_else(|| VerifyError::invalid("transaction hashes must be strings"))?;
        if keccak256(&tx) != bytes::hex_to_bytes32(hash)? {
            return Err(VerifyError::invalid("wrong transaction hash"));
        }
        out.push(tx);
    }
    Ok(out)
}

fn check_transactions_root(header: &BlockHeader<'_>, transactions: &[Vec<u8>]) -> VerifyResult<()> {
    let mut trie = TrieBuilder::new();
    for (i, tx) in transactions.iter().enumerate() {
        trie.insert(&rlp::encode_tx_path(i as u64), tx);
    }
    if trie.root() != header.transactions_root()? {
        return Err(VerifyError::invalid("Wrong Transaction root"));
    }
    Ok(())
}

/// The raw uncle headers of the proof must hash to the listed uncles and
/// to the header's uncles hash.
fn check_uncles(result: &Value, header: &BlockHeader<'_>, proof: &EthProof) -> VerifyResult<()> {
    let listed = result
        .get("uncles")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if listed.len() != proof.uncles.len() {
        return Err(VerifyError::missing("the proof does not contain all uncles"));
    }
    let mut payload = Vec::new();
    for (raw, hash) in proof.uncles.iter().zip(listed) {
        let hash = hash
            .as_str()
            .ok_or_else(|| VerifyError::invalid("uncle hashes must be strings"))?;
        if keccak256(raw) != bytes::hex_to_bytes32(hash)? {
            return Err(VerifyError::invalid("invalid uncle"));
        }
        payload.extend_from_slice(raw);
    }
    let mut encoded = Vec::with_capacity(payload.len() + 9);
    rlp::encode_list(&mut encoded, &payload);
    if keccak256(&encoded) != header.uncles_hash()? {
        return Err(VerifyError::invalid("invalid uncles hash"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::eth::{AuraChain, BlockFixture};
    use crate::types::{ChainSpec, Consensus, In3Response, RpcRequest};
    use serde_json::json;

    fn run(spec: &ChainSpec, method: &str, params: Vec<Value>, result: &Value, proof: Value, full: bool) -> VerifyResult<Verdict> {
        let eth = EthVerifier::new(spec);
        let mut state = ChainState::for_chain(spec, 5);
        let request = RpcRequest::new(method, params);
        let in3 = In3Response {
            proof: Some(proof),
            ..Default::default()
        };
        let ctx = VerificationContext::new(&request, result, Some(&in3))
            .with_finality(51)
            .with_full_proof(full);
        eth.verify(&ctx, &mut state)
    }

    fn pow() -> ChainSpec {
        ChainSpec::ethereum(1, Consensus::ProofOfWork)
    }

    #[test]
    fn test_block_by_hash_with_hashes() {
        let block = BlockFixture::pow(3);
        let params = vec![json!(bytes::to_hex(&block.hash())), json!(false)];
        let verdict = run(&pow(), "eth_getBlockByHash", params, &block.block_json(false), block.block_proof(), true);
        assert_eq!(verdict.unwrap(), Verdict::Verified);
    }

    #[test]
    fn test_block_by_number_with_full_transactions() {
        let block = BlockFixture::pow(3);
        let params = vec![json!(bytes::to_quantity(block.number)), json!(true)];
        let proof = json!({"type": "blockProof"});
        let verdict = run(&pow(), "eth_getBlockByNumber", params, &block.block_json(true), proof, false);
        assert_eq!(verdict.unwrap(), Verdict::Verified);
    }

    #[test]
    fn test_aura_block() {
        let chain = AuraChain::new(3);
        let block = BlockFixture::aura(&chain, 2, 1);
        let params = vec![json!(bytes::to_quantity(block.number)), json!(false)];
        let verdict = run(&chain.spec(), "eth_getBlockByNumber", params, &block.block_json(false), block.block_proof(), false);
        assert_eq!(verdict.unwrap(), Verdict::Verified);
    }

    #[test]
    fn test_missing_transaction_changes_root() {
        let block = BlockFixture::pow(3);
        let mut result = block.block_json(false);
        result["transactions"].as_array_mut().unwrap().pop();
        let mut proof = block.block_proof();
        proof["transactions"].as_array_mut().unwrap().pop();
        let params = vec![json!(bytes::to_quantity(block.number)), json!(false)];
        let err = run(&pow(), "eth_getBlockByNumber", params, &result, proof, false).unwrap_err();
        assert_eq!(err.message, "Wrong Transaction root");
    }

    #[test]
    fn test_tampered_header_field() {
        let block = BlockFixture::pow(1);
        let mut result = block.block_json(false);
        result["gasUsed"] = json!("0x1");
        let params = vec![json!(bytes::to_hex(&block.hash())), json!(false)];
        let err = run(&pow(), "eth_getBlockByHash", params, &result, block.block_proof(), false).unwrap_err();
        assert_eq!(err.message, "wrong blockhash");
    }

    #[test]
    fn test_author_mismatch() {
        let block = BlockFixture::pow(1);
        let mut result = block.block_json(false);
        result["author"] = json!(bytes::to_hex(&[0x77; 20]));
        let params = vec![json!("latest"), json!(false)];
        let err = run(&pow(), "eth_getBlockByNumber", params, &result, block.block_proof(), false).unwrap_err();
        assert_eq!(err.message, "invalid author");
    }

    #[test]
    fn test_transaction_count() {
        let block = BlockFixture::pow(3);
        let params = vec![json!(bytes::to_hex(&block.hash()))];
        let mut proof = block.block_proof();
        proof["block"] = json!(bytes::to_hex(&block.header));
        let verdict = run(&pow(), "eth_getBlockTransactionCountByHash", params.clone(), &json!("0x3"), proof.clone(), false);
        assert_eq!(verdict.unwrap(), Verdict::Verified);
        let err = run(&pow(), "eth_getBlockTransactionCountByHash", params, &json!("0x4"), proof, false).unwrap_err();
        assert_eq!(err.message, "wrong number of transactions");
    }
}
