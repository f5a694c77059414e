//! `eth_getTransactionReceipt`.

use super::{proof_block, serialize, EthVerifier};
use crate::crypto::keccak256;
use crate::error::{VerifyError, VerifyResult};
use crate::json;
use crate::rlp;
use crate::trie::{self, Expected};
use crate::types::EthProof;
use crate::verifier::{ChainState, Verdict, VerificationContext};
use serde_json::Value;

pub fn verify(eth: &EthVerifier, ctx: &VerificationContext<'_>, state: &mut ChainState) -> VerifyResult<Verdict> {
    let tx_hash = json::param_bytes(ctx.params(), 0)?;
    let tx_hash: [u8; 32] = tx_hash
        .try_into()
        .map_err(|_| VerifyError::invalid("invalid transaction hash"))?;
    let result = ctx.result;
    let proof: EthProof = ctx.proof()?;

    let block_hash = json::hash_field(result, "blockHash")?;
    let header = eth.verify_header(ctx, state, &proof, proof_block(&proof)?, Some(&block_hash))?;
    let number = header.number()?;
    if number != json::u64_field(result, "blockNumber")? {
        return Err(VerifyError::invalid("wrong blocknumber in the result"));
    }

    let tx_index = proof
        .tx_index
        .ok_or_else(|| VerifyError::missing("No txIndex in proof"))?;
    if json::u64_field(result, "transactionIndex")? != tx_index {
        return Err(VerifyError::invalid("wrong transactionIndex"));
    }
    if json::hash_field(result, "transactionHash")? != tx_hash {
        return Err(VerifyError::invalid("wrong transactionHash"));
    }

    let path = rlp::encode_tx_path(tx_index);
    let expected = serialize::receipt_from_json(result)?;
    trie::verify_proof(
        &header.receipts_root()?,
        &path,
        &proof.merkle_proof,
        Expected::Value(&expected),
    )
    .map_err(|e| VerifyError::from(e).context("Could not verify the merkle proof"))?;

    if proof.tx_proof.is_empty() {
        return Err(VerifyError::missing("No transaction proof"));
    }
    let raw_tx = trie::verify_proof(
        &header.transactions_root()?,
        &path,
        &proof.tx_proof,
        Expected::Fetch,
    )?
    .ok_or_else(|| VerifyError::invalid("the transaction is not in the transactions trie"))?;
    if keccak256(raw_tx) != tx_hash {
        return Err(VerifyError::invalid("The TransactionHash is not the same as expected"));
    }

    for log in result.get("logs").and_then(Value::as_array).into_iter().flatten() {
        verify_log(log, number, &block_hash, &tx_hash, tx_index)?;
    }
    Ok(Verdict::Verified)
}

/// A log's block and transaction references must agree with its receipt.
fn verify_log(log: &Value, number: u64, block_hash: &[u8; 32], tx_hash: &[u8; 32], tx_index: u64) -> VerifyResult<()> {
    let consistent = json::u64_field(log, "blockNumber")? == number
        && json::hash_field(log, "blockHash")? == *block_hash
        && json::hash_field(log, "transactionHash")? == *tx_hash
        && json::u64_field(log, "transactionIndex")? == tx_index;
    if !consistent {
        return Err(VerifyError::invalid("invalid log data"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fixtures::eth::{AuraChain, BlockFixture};
    use crate::types::{ChainSpec, Consensus, In3Response, RpcRequest};
    use serde_json::json;

    fn check(eth: &EthVerifier, state: &mut ChainState, block: &BlockFixture, result: &Value, proof: Value) -> VerifyResult<Verdict> {
        let request = RpcRequest::new("eth_getTransactionReceipt", vec![json!(block.tx_hash_hex(1))]);
        let in3 = In3Response {
            proof: Some(proof),
            ..Default::default()
        };
        let ctx = VerificationContext::new(&request, result, Some(&in3)).with_finality(51);
        eth.verify(&ctx, state)
    }

    #[test]
    fn test_receipt_on_aura_chain() {
        let chain = AuraChain::new(3);
        let spec = chain.spec();
        let eth = EthVerifier::new(&spec);
        let mut state = ChainState::for_chain(&spec, 5);
        let block = BlockFixture::aura(&chain, 3, 1);

        let verdict = check(&eth, &mut state, &block, &block.receipts_json[1], block.receipt_proof(1));
        assert_eq!(verdict.unwrap(), Verdict::Verified);
    }

    #[test]
    fn test_corrupted_receipt_leaf_rejected() {
        let chain = AuraChain::new(3);
        let spec = chain.spec();
        let eth = EthVerifier::new(&spec);
        let mut state = ChainState::for_chain(&spec, 5);
        let block = BlockFixture::aura(&chain, 3, 1);

        let mut proof = block.receipt_proof(1);
        let last = proof["merkleProof"].as_array().unwrap().len() - 1;
        let node = proof["merkleProof"][last].as_str().unwrap().to_string();
        // flip the final byte of the leaf node
        let mut bytes = crate::bytes::parse_hex(&node).unwrap();
        *bytes.last_mut().unwrap() ^= 0x01;
        proof["merkleProof"][last] = json!(crate::bytes::to_hex(&bytes));

        let err = check(&eth, &mut state, &block, &block.receipts_json[1], proof).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProofInvalid);
        assert!(err.blacklists_node());
    }

    #[test]
    fn test_tampered_receipt_rejected() {
        let spec = ChainSpec::ethereum(1, Consensus::ProofOfWork);
        let eth = EthVerifier::new(&spec);
        let mut state = ChainState::for_chain(&spec, 5);
        let block = BlockFixture::pow(3);

        let mut receipt = block.receipts_json[1].clone();
        receipt["cumulativeGasUsed"] = json!("0x1");
        let err = check(&eth, &mut state, &block, &receipt, block.receipt_proof(1)).unwrap_err();
        assert!(err.message.starts_with("Could not verify the merkle proof"));

        let mut receipt = block.receipts_json[1].clone();
        receipt["transactionIndex"] = json!("0x2");
        let err = check(&eth, &mut state, &block, &receipt, block.receipt_proof(1)).unwrap_err();
        assert_eq!(err.message, "wrong transactionIndex");
    }

    #[test]
    fn test_receipt_proof_of_other_tx_rejected() {
        let spec = ChainSpec::ethereum(1, Consensus::ProofOfWork);
        let eth = EthVerifier::new(&spec);
        let mut state = ChainState::for_chain(&spec, 5);
        let block = BlockFixture::pow(3);

        let mut proof = block.receipt_proof(1);
        proof["txProof"] = block.receipt_proof(2)["txProof"].clone();
        let err = check(&eth, &mut state, &block, &block.receipts_json[1], proof).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProofInvalid);
    }

    #[test]
    fn test_missing_block_proof() {
        let spec = ChainSpec::ethereum(1, Consensus::ProofOfWork);
        let eth = EthVerifier::new(&spec);
        let mut state = ChainState::for_chain(&spec, 5);
        let block = BlockFixture::pow(2);
        let err = check(&eth, &mut state, &block, &block.receipts_json[1], json!({"type": "receiptProof"}))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProofMissing);
        assert_eq!(err.message, "No Block-Proof!");
    }
}
