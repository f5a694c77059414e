use super::serde_hex;
use serde::{Deserialize, Serialize};

/// Which family of verifiers a chain uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    #[default]
    Eth,
    Btc,
    Ipfs,
}

/// How much proof the client asks for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofLevel {
    None,
    #[default]
    Standard,
    Full,
}

/// Validator set taking effect at `block`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorTransition {
    pub block: u64,
    #[serde(with = "serde_hex::addresses")]
    pub validators: Vec<[u8; 20]>,
}

/// Block sealing rules of an ethereum chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "camelCase")]
pub enum Consensus {
    #[default]
    ProofOfWork,
    #[serde(rename_all = "camelCase")]
    AuthorityRound {
        /// Contract emitting `InitiateChange` events; without it the
        /// validator set never changes.
        #[serde(with = "serde_hex::opt_fixed", default)]
        validator_contract: Option<[u8; 20]>,
        #[serde(default)]
        validators: Vec<ValidatorTransition>,
    },
    /// Headers are trusted once enough registered signers vouched for them.
    Federated,
}

/// Difficulty-adjustment-period bounds for bitcoin target verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BtcConfig {
    /// How many DAPs away from a verified target we still accept a new
    /// target within the 4x adjustment bound.
    pub max_daps: u64,
    /// Upper bound of DAPs proven in a single `btc_proofTarget` request.
    pub dap_limit: u64,
    /// Maximum target change in percent, forwarded to `btc_proofTarget`.
    pub max_diff: u64,
}

impl Default for BtcConfig {
    fn default() -> Self {
        Self {
            max_daps: 20,
            dap_limit: 20,
            max_diff: 10,
        }
    }
}

/// Verification-relevant description of one chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChainSpec {
    #[serde(with = "serde_hex::quantity")]
    pub chain_id: u64,
    pub chain_type: ChainType,
    pub consensus: Consensus,
    /// Node registry version; signatures of version 2+ registries commit to
    /// the registry id.
    pub version: u32,
    #[serde(with = "serde_hex::opt_fixed")]
    pub registry_id: Option<[u8; 32]>,
    pub btc: BtcConfig,
}

impl Default for ChainSpec {
    fn default() -> Self {
        Self {
            chain_id: 1,
            chain_type: ChainType::Eth,
            consensus: Consensus::ProofOfWork,
            version: 2,
            registry_id: None,
            btc: BtcConfig::default(),
        }
    }
}

impl ChainSpec {
    pub fn ethereum(chain_id: u64, consensus: Consensus) -> Self {
        Self {
            chain_id,
            consensus,
            ..Self::default()
        }
    }

    pub fn bitcoin(chain_id: u64) -> Self {
        Self {
            chain_id,
            chain_type: ChainType::Btc,
            ..Self::default()
        }
    }

    pub fn ipfs(chain_id: u64) -> Self {
        Self {
            chain_id,
            chain_type: ChainType::Ipfs,
            ..Self::default()
        }
    }
}
