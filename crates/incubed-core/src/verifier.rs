//! Chain-type dispatch. A [`VerificationEngine`] owns one [`Verifier`] and
//! its mutable [`ChainState`] per registered chain.

use crate::btc::target::TargetCache;
use crate::btc::BtcVerifier;
use crate::error::{VerifyError, VerifyResult};
use crate::eth::aura::ValidatorHistory;
use crate::eth::header::VerifiedHashes;
use crate::eth::EthVerifier;
use crate::ipfs;
use crate::types::{ChainSpec, ChainType, Consensus, In3Response, ProofLevel, RpcRequest};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Default bound of the verified block hash cache per chain.
pub const DEFAULT_MAX_VERIFIED_HASHES: usize = 5;

/// Everything a verifier sees of one RPC call.
#[derive(Clone, Copy, Debug)]
pub struct VerificationContext<'a> {
    pub request: &'a RpcRequest,
    /// `Value::Null` for error responses and empty results.
    pub result: &'a Value,
    pub in3: Option<&'a In3Response>,
    pub proof_level: ProofLevel,
    /// Ethereum: percentage of validators that must have signed on top of the
    /// block. Bitcoin: number of headers on top of the block.
    pub finality: u8,
    pub use_full_proof: bool,
    /// Nodes asked to sign the block hash (federated verification).
    pub signers: &'a [[u8; 20]],
}

impl<'a> VerificationContext<'a> {
    pub fn new(request: &'a RpcRequest, result: &'a Value, in3: Option<&'a In3Response>) -> Self {
        Self {
            request,
            result,
            in3,
            proof_level: ProofLevel::Standard,
            finality: 0,
            use_full_proof: false,
            signers: &[],
        }
    }

    pub fn with_proof_level(mut self, level: ProofLevel) -> Self {
        self.proof_level = level;
        self
    }

    pub fn with_finality(mut self, finality: u8) -> Self {
        self.finality = finality;
        self
    }

    pub fn with_full_proof(mut self, full: bool) -> Self {
        self.use_full_proof = full;
        self
    }

    pub fn with_signers(mut self, signers: &'a [[u8; 20]]) -> Self {
        self.signers = signers;
        self
    }

    pub fn method(&self) -> &'a str {
        &self.request.method
    }

    pub fn params(&self) -> &'a [Value] {
        &self.request.params
    }

    pub fn raw_proof(&self) -> Option<&'a Value> {
        self.in3.and_then(|in3| in3.proof.as_ref()).filter(|p| !p.is_null())
    }

    /// The typed `in3.proof`.
    pub fn proof<T: DeserializeOwned>(&self) -> VerifyResult<T> {
        let raw = self
            .raw_proof()
            .ok_or_else(|| VerifyError::missing("Proof is missing!"))?;
        serde_json::from_value(raw.clone())
            .map_err(|e| VerifyError::invalid(format!("invalid proof: {}", e)))
    }

    pub fn last_validator_change(&self) -> Option<u64> {
        self.in3.and_then(|in3| in3.last_validator_change)
    }
}

/// Outcome of a successful verification step.
#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    Verified,
    /// Verification can only continue once this request has been answered
    /// and verified on the same chain.
    NeedsRequest(RpcRequest),
}

/// State a chain's verifier accumulates across calls.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChainState {
    pub verified_hashes: VerifiedHashes,
    pub validators: ValidatorHistory,
    pub btc_targets: TargetCache,
}

impl ChainState {
    pub fn for_chain(spec: &ChainSpec, max_verified_hashes: usize) -> Self {
        let validators = match &spec.consensus {
            Consensus::AuthorityRound { validators, .. } => {
                ValidatorHistory::from_transitions(validators.clone())
            }
            _ => ValidatorHistory::default(),
        };
        let btc_targets = match spec.chain_type {
            ChainType::Btc => TargetCache::with_checkpoints(spec.chain_id),
            _ => TargetCache::new(),
        };
        Self {
            verified_hashes: VerifiedHashes::new(max_verified_hashes),
            validators,
            btc_targets,
        }
    }
}

/// The verifier of one chain, selected by chain type and consensus.
#[derive(Clone, Debug, PartialEq)]
pub enum Verifier {
    EthereumPoW(EthVerifier),
    EthereumPoA(EthVerifier),
    EthereumFederated(EthVerifier),
    Bitcoin(BtcVerifier),
    Ipfs,
}

impl Verifier {
    pub fn for_chain(spec: &ChainSpec) -> Self {
        match spec.chain_type {
            ChainType::Btc => Verifier::Bitcoin(BtcVerifier::new(spec.chain_id, spec.btc)),
            ChainType::Ipfs => Verifier::Ipfs,
            ChainType::Eth => {
                let eth = EthVerifier::new(spec);
                match spec.consensus {
                    Consensus::ProofOfWork => Verifier::EthereumPoW(eth),
                    Consensus::AuthorityRound { .. } => Verifier::EthereumPoA(eth),
                    Consensus::Federated => Verifier::EthereumFederated(eth),
                }
            }
        }
    }

    pub fn verify(&self, ctx: &VerificationContext<'_>, state: &mut ChainState) -> VerifyResult<Verdict> {
        if ctx.proof_level == ProofLevel::None {
            return Ok(Verdict::Verified);
        }
        match self {
            Verifier::EthereumPoW(eth) | Verifier::EthereumPoA(eth) => eth.verify(ctx, state),
            Verifier::EthereumFederated(eth) => {
                if ctx.signers.is_empty() {
                    return Err(VerifyError::config(
                        "a federated chain needs at least one signer per request",
                    ));
                }
                eth.verify(ctx, state)
            }
            Verifier::Bitcoin(btc) => btc.verify(ctx, &mut state.btc_targets),
            Verifier::Ipfs => ipfs::verify(ctx),
        }
    }
}

struct RegisteredChain {
    spec: ChainSpec,
    verifier: Verifier,
    state: ChainState,
}

/// Registered verifiers keyed by chain id.
pub struct VerificationEngine {
    chains: HashMap<u64, RegisteredChain>,
    max_verified_hashes: usize,
}

impl Default for VerificationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl VerificationEngine {
    pub fn new() -> Self {
        Self {
            chains: HashMap::new(),
            max_verified_hashes: DEFAULT_MAX_VERIFIED_HASHES,
        }
    }

    /// Applies to chains registered afterwards.
    pub fn with_max_verified_hashes(mut self, max: usize) -> Self {
        self.max_verified_hashes = max;
        self
    }

    /// Register (or replace) a chain.
    pub fn register(&mut self, spec: ChainSpec) {
        debug!(chain_id = spec.chain_id, chain_type = ?spec.chain_type, "registering verifier");
        let chain = RegisteredChain {
            verifier: Verifier::for_chain(&spec),
            state: ChainState::for_chain(&spec, self.max_verified_hashes),
            spec,
        };
        self.chains.insert(chain.spec.chain_id, chain);
    }

    pub fn spec(&self, chain_id: u64) -> Option<&ChainSpec> {
        self.chains.get(&chain_id).map(|c| &c.spec)
    }

    pub fn verifier(&self, chain_id: u64) -> Option<&Verifier> {
        self.chains.get(&chain_id).map(|c| &c.verifier)
    }

    pub fn state(&self, chain_id: u64) -> Option<&ChainState> {
        self.chains.get(&chain_id).map(|c| &c.state)
    }

    pub fn state_mut(&mut self, chain_id: u64) -> Option<&mut ChainState> {
        self.chains.get_mut(&chain_id).map(|c| &mut c.state)
    }

    pub fn verify(&mut self, chain_id: u64, ctx: &VerificationContext<'_>) -> VerifyResult<Verdict> {
        let chain = self
            .chains
            .get_mut(&chain_id)
            .ok_or_else(|| VerifyError::config(format!("chain 0x{:x} is not registered", chain_id)))?;
        chain.verifier.verify(ctx, &mut chain.state)
    }
}
