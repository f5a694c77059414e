//! Client configuration, read from a JSON document.

use crate::error::ClientError;
use crate::nodes::NodeRecord;
use incubed_core::types::serde_hex;
use incubed_core::{ChainSpec, ProofLevel, DEFAULT_MAX_VERIFIED_HASHES};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    /// Chain requests go to unless the caller names one.
    #[serde(with = "serde_hex::quantity")]
    pub chain_id: u64,
    /// Rounds of node selection before a request gives up.
    pub max_attempts: u32,
    /// Nodes asked in parallel per round.
    pub request_count: usize,
    /// Per round, in milliseconds, handed to the transport.
    pub timeout: u64,
    /// Whole request including retries and sub-requests, in seconds.
    pub max_duration: u64,
    /// Percentage of validators (ethereum) or headers on top (bitcoin).
    pub finality: u8,
    pub proof: ProofLevel,
    /// Signers asked to vouch for a block hash on federated chains.
    pub signature_count: usize,
    pub min_deposit: u64,
    /// Capability bits every selected node must have.
    pub node_props: u64,
    pub max_verified_hashes: usize,
    pub use_full_proof: bool,
    /// Seconds a node stays blacklisted after a verification failure.
    pub blacklist_time: u64,
    /// Nesting limit for requests a verification depends on.
    pub max_depth: usize,
    pub chains: Vec<ChainConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            max_attempts: 7,
            request_count: 1,
            timeout: 10_000,
            max_duration: 120,
            finality: 0,
            proof: ProofLevel::Standard,
            signature_count: 0,
            min_deposit: 0,
            node_props: 0,
            max_verified_hashes: DEFAULT_MAX_VERIFIED_HASHES,
            use_full_proof: false,
            blacklist_time: 24 * 3600,
            max_depth: 4,
            chains: Vec::new(),
        }
    }
}

/// A chain the client can talk to: how to verify it and where to start.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    #[serde(flatten)]
    pub spec: ChainSpec,
    /// Bootstrap node list.
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
}

impl ChainConfig {
    pub fn new(spec: ChainSpec, nodes: Vec<NodeRecord>) -> Self {
        Self { spec, nodes }
    }
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self, ClientError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ClientError::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no request could succeed with.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.max_attempts == 0 {
            return Err(ClientError::Config("maxAttempts must be at least 1".into()));
        }
        if self.request_count == 0 {
            return Err(ClientError::Config("requestCount must be at least 1".into()));
        }
        if self.finality > 100 {
            return Err(ClientError::Config(format!(
                "finality is a percentage, got {}",
                self.finality
            )));
        }
        if self.max_verified_hashes == 0 {
            return Err(ClientError::Config("maxVerifiedHashes must be at least 1".into()));
        }
        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.spec.chain_id) {
                return Err(ClientError::Config(format!(
                    "chain 0x{:x} is configured twice",
                    chain.spec.chain_id
                )));
            }
        }
        Ok(())
    }

    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.spec.chain_id == chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use incubed_core::{ChainType, Consensus, ErrorKind};

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_json("{}").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.max_attempts, 7);
        assert_eq!(config.proof, ProofLevel::Standard);
    }

    #[test]
    fn test_parse_chains() {
        let json = r#"{
            "chainId": "0x2a",
            "requestCount": 2,
            "finality": 51,
            "proof": "full",
            "chains": [
                {
                    "chainId": "0x2a",
                    "consensus": {
                        "engine": "authorityRound",
                        "validators": [{"block": 0, "validators": ["0x00000000000000000000000000000000000000aa"]}]
                    },
                    "nodes": [{"url": "https://node1", "address": "0x00000000000000000000000000000000000000b1", "props": "0x1"}]
                },
                {"chainId": "0x99", "chainType": "btc", "btc": {"maxDaps": 5}}
            ]
        }"#;
        let config = ClientConfig::from_json(json).unwrap();
        assert_eq!(config.chain_id, 42);
        assert_eq!(config.request_count, 2);
        assert_eq!(config.proof, ProofLevel::Full);

        let kovan = config.chain(42).unwrap();
        assert!(matches!(kovan.spec.consensus, Consensus::AuthorityRound { .. }));
        assert_eq!(kovan.nodes.len(), 1);
        assert_eq!(kovan.nodes[0].props, 1);

        let btc = config.chain(0x99).unwrap();
        assert_eq!(btc.spec.chain_type, ChainType::Btc);
        assert_eq!(btc.spec.btc.max_daps, 5);
        assert_eq!(btc.spec.btc.dap_limit, 20);
    }

    #[test]
    fn test_impossible_settings() {
        for json in [
            r#"{"maxAttempts": 0}"#,
            r#"{"requestCount": 0}"#,
            r#"{"finality": 101}"#,
            r#"{"chains": [{"chainId": 1}, {"chainId": "0x1"}]}"#,
            r#"{"maxAttempts": "many"}"#,
        ] {
            let err = ClientConfig::from_json(json).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config, "{}", json);
        }
    }
}
