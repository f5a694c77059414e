//! Transaction lookups: by hash, or by block and index.

use super::header::BlockHeader;
use super::{proof_block, serialize, EthVerifier};
use crate::crypto::keccak256;
use crate::error::{VerifyError, VerifyResult};
use crate::json;
use crate::rlp;
use crate::trie::{self, Expected};
use crate::types::EthProof;
use crate::verifier::{ChainState, Verdict, VerificationContext};

/// `eth_getTransactionByHash`
pub fn verify_by_hash(eth: &EthVerifier, ctx: &VerificationContext<'_>, state: &mut ChainState) -> VerifyResult<Verdict> {
    let tx_hash = json::param_hash(ctx.params(), 0)?;
    let proof: EthProof = ctx.proof()?;
    let block_hash = json::hash_field(ctx.result, "blockHash")?;
    let header = eth.verify_header(ctx, state, &proof, proof_block(&proof)?, Some(&block_hash))?;
    let tx_index = proof
        .tx_index
        .ok_or_else(|| VerifyError::missing("No txIndex in proof"))?;
    verify_in_block(ctx, &header, &proof, &tx_hash, tx_index)?;
    Ok(Verdict::Verified)
}

/// Lookups by block and index; a `null` result for them needs an
/// absence proof.
pub const BY_BLOCK_METHODS: &[&str] = &[
    "eth_getTransactionByBlockHashAndIndex",
    "eth_getTransactionByBlockNumberAndIndex",
];

/// `eth_getTransactionByBlockHashAndIndex` / `eth_getTransactionByBlockNumberAndIndex`
pub fn verify_by_block_and_index(eth: &EthVerifier, ctx: &VerificationContext<'_>, state: &mut ChainState) -> VerifyResult<Verdict> {
    let params = ctx.params();
    let tx_index = params
        .get(1)
        .and_then(json::as_u64)
        .ok_or_else(|| VerifyError::invalid("missing transaction index"))?;
    let proof: EthProof = ctx.proof()?;
    if ctx.result.is_null() {
        verify_absent(eth, ctx, state, &proof, tx_index)?;
        return Ok(Verdict::Verified);
    }
    let block_hash = json::hash_field(ctx.result, "blockHash")?;
    let header = eth.verify_header(ctx, state, &proof, proof_block(&proof)?, Some(&block_hash))?;

    if ctx.method() == "eth_getTransactionByBlockHashAndIndex" {
        if json::param_hash(params, 0)? != block_hash {
            return Err(VerifyError::invalid("wrong blockhash"));
        }
    } else if let Some(number) = params.first().and_then(json::as_u64) {
        if number != header.number()? {
            return Err(VerifyError::invalid("wrong blocknumber"));
        }
    }
    if proof.tx_index.is_some_and(|i| i != tx_index) {
        return Err(VerifyError::invalid("wrong transactionIndex"));
    }

    let tx_hash = json::hash_field(ctx.result, "hash")?;
    verify_in_block(ctx, &header, &proof, &tx_hash, tx_index)?;
    Ok(Verdict::Verified)
}

/// No transaction sits at `tx_index` of the requested block.
fn verify_absent(
    eth: &EthVerifier,
    ctx: &VerificationContext<'_>,
    state: &mut ChainState,
    proof: &EthProof,
    tx_index: u64,
) -> VerifyResult<()> {
    let params = ctx.params();
    let requested_hash = match ctx.method() {
        "eth_getTransactionByBlockHashAndIndex" => Some(json::param_hash(params, 0)?),
        _ => None,
    };
    let header = eth.verify_header(ctx, state, proof, proof_block(proof)?, requested_hash.as_ref())?;
    if requested_hash.is_none() {
        if let Some(number) = params.first().and_then(json::as_u64) {
            if number != header.number()? {
                return Err(VerifyError::invalid("wrong blocknumber"));
            }
        }
    }
    if proof.tx_index.is_some_and(|i| i != tx_index) {
        return Err(VerifyError::invalid("wrong transactionIndex"));
    }

    trie::verify_proof(
        &header.transactions_root()?,
        &rlp::encode_tx_path(tx_index),
        &proof.merkle_proof,
        Expected::Absent,
    )
    .map_err(|e| VerifyError::from(e).context("Could not prove non-existence of transaction"))?;
    Ok(())
}

/// The result is the transaction at `tx_index` of the verified header.
fn verify_in_block(
    ctx: &VerificationContext<'_>,
    header: &BlockHeader<'_>,
    proof: &EthProof,
    tx_hash: &[u8; 32],
    tx_index: u64,
) -> VerifyResult<()> {
    let result = ctx.result;
    if json::u64_field(result, "blockNumber")? != header.number()? {
        return Err(VerifyError::invalid("wrong blocknumber in the result"));
    }
    if json::u64_field(result, "transactionIndex")? != tx_index {
        return Err(VerifyError::invalid("wrong transactionIndex"));
    }
    if json::hash_field(result, "hash")? != *tx_hash {
        return Err(VerifyError::invalid("wrong transactionHash"));
    }

    let raw = trie::verify_proof(
        &header.transactions_root()?,
        &rlp::encode_tx_path(tx_index),
        &proof.merkle_proof,
        Expected::Fetch,
    )
    .map_err(|e| VerifyError::from(e).context("Could not verify the merkle proof"))?
    .ok_or_else(|| VerifyError::invalid("the transaction is not in the transactions trie"))?;
    if keccak256(raw) != *tx_hash {
        return Err(VerifyError::invalid("The TransactionHash is not the same as expected"));
    }
    if serialize::tx_from_json(result)? != raw {
        return Err(VerifyError::invalid("Could not verify the transaction data"));
    }
    Ok(())
}
