//! Ethereum verification: block headers (PoW, authority round, federated
//! signatures) and the per-method proofs rooted in a verified header.

pub mod account;
pub mod aura;
pub mod block;
pub mod header;
pub mod receipt;
pub mod serialize;
pub mod signatures;
pub mod transaction;

use self::header::BlockHeader;
use crate::crypto::keccak256;
use crate::error::{VerifyError, VerifyResult};
use crate::json;
use crate::types::{ChainSpec, Consensus, EthProof, RpcRequest};
use crate::verifier::{ChainState, Verdict, VerificationContext};
use tracing::{debug, warn};

/// Methods whose results cannot be proven; they are accepted as is.
pub const NO_PROOF_METHODS: &[&str] = &[
    "eth_chainId",
    "in3_stats",
    "eth_blockNumber",
    "web3_clientVersion",
    "web3_sha3",
    "net_version",
    "net_peerCount",
    "net_listening",
    "eth_protocolVersion",
    "eth_syncing",
    "eth_coinbase",
    "eth_mining",
    "eth_hashrate",
    "eth_gasPrice",
    "eth_accounts",
    "eth_sign",
    "eth_estimateGas",
    "eth_getWork",
    "eth_submitWork",
    "eth_submitHashrate",
    "eth_getProof",
    "eth_newFilter",
    "eth_newBlockFilter",
    "eth_newPendingFilter",
    "eth_uninstallFilter",
    "eth_getFilterChanges",
];

#[derive(Clone, Debug, PartialEq)]
pub struct EthVerifier {
    pub chain_id: u64,
    pub version: u32,
    pub registry_id: Option<[u8; 32]>,
    aura: bool,
    validator_contract: Option<[u8; 20]>,
}

impl EthVerifier {
    pub fn new(spec: &ChainSpec) -> Self {
        let (aura, validator_contract) = match &spec.consensus {
            Consensus::AuthorityRound {
                validator_contract, ..
            } => (true, *validator_contract),
            _ => (false, None),
        };
        Self {
            chain_id: spec.chain_id,
            version: spec.version,
            registry_id: spec.registry_id,
            aura,
            validator_contract,
        }
    }

    pub fn verify(&self, ctx: &VerificationContext<'_>, state: &mut ChainState) -> VerifyResult<Verdict> {
        let method = ctx.method();
        if NO_PROOF_METHODS.contains(&method) {
            return Ok(Verdict::Verified);
        }
        // a missing transaction at a block index has to be proven absent
        if ctx.result.is_null() && !transaction::BY_BLOCK_METHODS.contains(&method) {
            return Ok(Verdict::Verified);
        }
        if method == "in3_validatorList" {
            return self.verify_validator_list(ctx, state);
        }
        if let Some(request) = self.validator_update(ctx, state) {
            return Ok(Verdict::NeedsRequest(request));
        }

        match method {
            "eth_getTransactionReceipt" => receipt::verify(self, ctx, state),
            "eth_getTransactionByHash" => transaction::verify_by_hash(self, ctx, state),
            m if transaction::BY_BLOCK_METHODS.contains(&m) => {
                transaction::verify_by_block_and_index(self, ctx, state)
            }
            "eth_getBlockByHash" | "eth_getBlockByNumber" => block::verify(self, ctx, state),
            "eth_getBlockTransactionCountByHash" | "eth_getBlockTransactionCountByNumber" => {
                block::verify_transaction_count(self, ctx, state)
            }
            "eth_getBalance" | "eth_getTransactionCount" | "eth_getCode" | "eth_getStorageAt" => {
                account::verify(self, ctx, state)
            }
            "eth_sendRawTransaction" => verify_send_raw(ctx),
            other => Err(VerifyError::unsupported(format!(
                "The method {} is not supported",
                other
            ))),
        }
    }

    /// The node knows a newer validator set than we do; it has to be
    /// verified before any aura header can be.
    fn validator_update(&self, ctx: &VerificationContext<'_>, state: &ChainState) -> Option<RpcRequest> {
        self.validator_contract?;
        let change = ctx.last_validator_change()?;
        if !self.aura || change <= state.validators.last_change() {
            return None;
        }
        debug!(
            chain_id = self.chain_id,
            known = state.validators.last_change(),
            announced = change,
            "validator list is outdated"
        );
        Some(RpcRequest::new("in3_validatorList", vec![]))
    }

    fn verify_validator_list(&self, ctx: &VerificationContext<'_>, state: &mut ChainState) -> VerifyResult<Verdict> {
        let contract = match (self.aura, self.validator_contract) {
            (true, Some(contract)) => contract,
            _ => {
                return Err(VerifyError::unsupported(
                    "in3_validatorList needs an authority round chain with a validator contract",
                ))
            }
        };
        let list: aura::ValidatorList = serde_json::from_value(ctx.result.clone())
            .map_err(|e| VerifyError::invalid(format!("invalid validator list: {}", e)))?;
        aura::verify_validator_list(&list, &mut state.validators, &contract, ctx.finality)?;
        Ok(Verdict::Verified)
    }

    /// Verify `raw` as a block header of this chain. `expected` is the hash
    /// the result claims for it.
    pub fn verify_header<'h>(
        &self,
        ctx: &VerificationContext<'_>,
        state: &mut ChainState,
        proof: &'h EthProof,
        raw: &'h [u8],
        expected: Option<&[u8; 32]>,
    ) -> VerifyResult<BlockHeader<'h>> {
        let header = BlockHeader::parse(raw)?;
        let hash = header.hash();
        if expected.is_some_and(|e| *e != hash) {
            return Err(VerifyError::invalid("wrong blockhash"));
        }
        let number = header.number()?;

        if let Some(cached) = state.verified_hashes.get(number) {
            if cached != hash {
                warn!(number, "header conflicts with a verified block hash");
                return Err(VerifyError::invalid("invalid blockhash"));
            }
            return Ok(header);
        }

        if !ctx.signers.is_empty() {
            signatures::verify_signatures(
                &proof.signatures,
                ctx.signers,
                &hash,
                number,
                self.version,
                self.registry_id.as_ref(),
            )?;
            state.verified_hashes.insert(number, hash);
        } else if self.aura {
            let mut headers = Vec::with_capacity(proof.finality_blocks.len() + 1);
            headers.push(header);
            for block in &proof.finality_blocks {
                headers.push(BlockHeader::parse(block)?);
            }
            aura::verify_authority(&headers, &state.validators, ctx.finality)?;
        }
        Ok(header)
    }
}

/// The raw header of `in3.proof.block`.
pub(crate) fn proof_block(proof: &EthProof) -> VerifyResult<&[u8]> {
    proof
        .block
        .as_deref()
        .ok_or_else(|| VerifyError::missing("No Block-Proof!"))
}

fn verify_send_raw(ctx: &VerificationContext<'_>) -> VerifyResult<Verdict> {
    let raw = json::param_bytes(ctx.params(), 0)?;
    let result = ctx
        .result
        .as_str()
        .ok_or_else(|| VerifyError::invalid("the result must be a transaction hash"))?;
    if crate::bytes::hex_to_bytes32(result)? != keccak256(&raw) {
        return Err(VerifyError::invalid(
            "the transactionHash of the response does not match the raw transaction",
        ));
    }
    Ok(Verdict::Verified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fixtures::eth::{address_of, sign_block_hash, signing_key, AuraChain, BlockFixture};
    use crate::types::{In3Response, ProofLevel};
    use serde_json::json;

    fn pow_chain() -> (EthVerifier, ChainState) {
        let spec = ChainSpec::ethereum(1, Consensus::ProofOfWork);
        (EthVerifier::new(&spec), ChainState::for_chain(&spec, 5))
    }

    #[test]
    fn test_no_proof_methods_accepted() {
        let (eth, mut state) = pow_chain();
        let request = RpcRequest::new("eth_blockNumber", vec![]);
        let result = json!("0x10");
        let ctx = VerificationContext::new(&request, &result, None);
        assert_eq!(eth.verify(&ctx, &mut state).unwrap(), Verdict::Verified);
    }

    #[test]
    fn test_unknown_method_unsupported() {
        let (eth, mut state) = pow_chain();
        let request = RpcRequest::new("eth_call", vec![]);
        let result = json!("0x");
        let ctx = VerificationContext::new(&request, &result, None);
        assert_eq!(eth.verify(&ctx, &mut state).unwrap_err().kind, ErrorKind::Unsupported);
    }

    #[test]
    fn test_send_raw_transaction() {
        let (eth, mut state) = pow_chain();
        let raw = [0xf8, 0x01, 0x02];
        let request = RpcRequest::new("eth_sendRawTransaction", vec![json!(crate::bytes::to_hex(&raw))]);
        let good = json!(crate::bytes::to_hex(&keccak256(&raw)));
        let ctx = VerificationContext::new(&request, &good, None);
        assert!(eth.verify(&ctx, &mut state).is_ok());
        let bad = json!(crate::bytes::to_hex(&[0u8; 32]));
        let ctx = VerificationContext::new(&request, &bad, None);
        assert!(eth.verify(&ctx, &mut state).is_err());
    }

    #[test]
    fn test_cached_hash_must_match() {
        let (eth, mut state) = pow_chain();
        let block = BlockFixture::pow(1);
        let proof = EthProof::default();
        let request = RpcRequest::new("eth_getBlockByNumber", vec![]);
        let result = json!(null);
        let ctx = VerificationContext::new(&request, &result, None);

        state.verified_hashes.insert(block.number, [0xee; 32]);
        let err = eth.verify_header(&ctx, &mut state, &proof, &block.header, None).unwrap_err();
        assert_eq!(err.message, "invalid blockhash");

        state.verified_hashes.insert(block.number, keccak256(&block.header));
        assert!(eth.verify_header(&ctx, &mut state, &proof, &block.header, None).is_ok());
        assert_eq!(
            eth.verify_header(&ctx, &mut state, &proof, &block.header, Some(&[1; 32]))
                .unwrap_err()
                .message,
            "wrong blockhash"
        );
    }

    #[test]
    fn test_federated_header_is_cached() {
        let spec = ChainSpec::ethereum(5, Consensus::Federated);
        let eth = EthVerifier::new(&spec);
        let mut state = ChainState::for_chain(&spec, 5);
        let block = BlockFixture::pow(1);
        let hash = keccak256(&block.header);
        let key = signing_key(7);
        let signers = [address_of(&key)];
        let proof = EthProof {
            signatures: vec![sign_block_hash(&key, &hash, block.number, 2, None)],
            ..Default::default()
        };
        let request = RpcRequest::new("eth_getBlockByNumber", vec![]);
        let result = json!(null);
        let ctx = VerificationContext::new(&request, &result, None).with_signers(&signers);

        eth.verify_header(&ctx, &mut state, &proof, &block.header, Some(&hash)).unwrap();
        assert_eq!(state.verified_hashes.get(block.number), Some(hash));
    }

    #[test]
    fn test_newer_validator_change_requires_list() {
        let chain = AuraChain::new(3);
        let spec = chain.spec();
        let eth = EthVerifier::new(&spec);
        let mut state = ChainState::for_chain(&spec, 5);
        let block = BlockFixture::aura(&chain, 1, 1);
        let request = RpcRequest::new("eth_getTransactionReceipt", vec![json!(block.tx_hash_hex(0))]);
        let in3 = In3Response {
            proof: Some(block.receipt_proof(0)),
            last_validator_change: Some(500),
            ..Default::default()
        };
        let ctx = VerificationContext::new(&request, &block.receipts_json[0], Some(&in3))
            .with_proof_level(ProofLevel::Standard)
            .with_finality(51);

        let verdict = eth.verify(&ctx, &mut state).unwrap();
        let Verdict::NeedsRequest(child) = verdict else {
            panic!("expected a validator list request, got {:?}", verdict)
        };
        assert_eq!(child.method, "in3_validatorList");

        // answering the child brings the history up to date
        let list = serde_json::to_value(chain.validator_change(500, &chain.validators)).unwrap();
        let child_ctx = VerificationContext::new(&child, &list, None).with_finality(51);
        assert_eq!(eth.verify(&child_ctx, &mut state).unwrap(), Verdict::Verified);
        assert_eq!(state.validators.last_change(), 500);
        assert_eq!(eth.verify(&ctx, &mut state).unwrap(), Verdict::Verified);
    }
}
