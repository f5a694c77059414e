//! Authority round: seal recovery, the finality walk over consecutive
//! headers and the validator history fed by `in3_validatorList`.

use super::header::BlockHeader;
use crate::crypto::recover_address;
use crate::error::{VerifyError, VerifyResult};
use crate::rlp;
use crate::trie::{self, Expected};
use crate::types::{serde_hex, Receipt, ValidatorTransition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// `InitiateChange(bytes32,address[])` of the validator set contract.
pub const INITIATE_CHANGE_TOPIC: [u8; 32] = [
    0x55, 0x25, 0x2f, 0xa6, 0xee, 0xe4, 0x74, 0x1b, 0x4e, 0x24, 0xa7, 0x4a, 0x70, 0xe9, 0xc1,
    0x1f, 0xd2, 0xc2, 0x28, 0x1d, 0xf8, 0xd6, 0xea, 0x13, 0x12, 0x6f, 0xf8, 0x45, 0xf7, 0x82,
    0x5c, 0x89,
];

/// Validator sets ordered by the block they take effect at.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorHistory {
    transitions: Vec<ValidatorTransition>,
    last_change: u64,
}

impl ValidatorHistory {
    pub fn from_transitions(mut transitions: Vec<ValidatorTransition>) -> Self {
        transitions.sort_by_key(|t| t.block);
        let last_change = transitions.last().map(|t| t.block).unwrap_or_default();
        Self {
            transitions,
            last_change,
        }
    }

    pub fn storage_key(chain_id: u64) -> String {
        format!("validators_{}", chain_id)
    }

    /// Block of the newest known transition.
    pub fn last_change(&self) -> u64 {
        self.last_change
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// The set in effect at `block`.
    pub fn validators_at(&self, block: u64) -> &[[u8; 20]] {
        self.transitions
            .iter()
            .rev()
            .find(|t| t.block <= block)
            .map(|t| t.validators.as_slice())
            .unwrap_or_default()
    }

    pub fn add(&mut self, transition: ValidatorTransition) {
        info!(
            block = transition.block,
            validators = transition.validators.len(),
            "validator set changed"
        );
        self.last_change = self.last_change.max(transition.block);
        self.transitions.retain(|t| t.block != transition.block);
        let at = self.transitions.partition_point(|t| t.block < transition.block);
        self.transitions.insert(at, transition);
    }
}

/// Address that sealed an aura header.
pub fn signer(header: &BlockHeader<'_>) -> VerifyResult<[u8; 20]> {
    let (rs, v) = header.seal_signature()?;
    recover_address(&header.bare_hash()?, &rs, v)
        .map_err(|_| VerifyError::invalid("The signature of a validator could not recover!"))
}

/// Check that every header was sealed by the validator whose turn it was,
/// that the headers form a chain, and that enough of the validator set
/// signed on top of the first one. `passed * 100 / validators` truncates.
pub fn verify_authority(headers: &[BlockHeader<'_>], history: &ValidatorHistory, needed_finality: u8) -> VerifyResult<()> {
    let first = headers
        .first()
        .ok_or_else(|| VerifyError::invalid("no header to verify"))?;
    let validator_count = history.validators_at(first.number()?).len();
    if validator_count == 0 {
        return Err(VerifyError::invalid("no validators"));
    }

    let mut parent: Option<[u8; 32]> = None;
    for header in headers {
        if let Some(hash) = parent {
            if header.parent_hash()? != hash {
                return Err(VerifyError::invalid(
                    "The parent hashes of the finality blocks don't match",
                ));
            }
        }
        let validators = history.validators_at(header.number()?);
        if validators.is_empty() {
            return Err(VerifyError::invalid("could not find the validator for the block"));
        }
        let proposer = validators[(header.step()? % validators.len() as u64) as usize];
        if signer(header)? != proposer {
            return Err(VerifyError::invalid("the block was signed by the wrong key"));
        }
        parent = Some(header.hash());
    }

    if headers.len() * 100 / validator_count < needed_finality as usize {
        return Err(VerifyError::invalid("not enough blocks to reach finality"));
    }
    Ok(())
}

/// Result of `in3_validatorList`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidatorList {
    pub states: Vec<ValidatorState>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidatorState {
    #[serde(with = "serde_hex::quantity")]
    pub block: u64,
    #[serde(with = "serde_hex::addresses")]
    pub validators: Vec<[u8; 20]>,
    pub proof: Option<ValidatorStateProof>,
}

/// Proof that the `InitiateChange` event of a state was finalized.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidatorStateProof {
    #[serde(with = "serde_hex::bytes")]
    pub block: Vec<u8>,
    #[serde(with = "serde_hex::bytes_list")]
    pub finality_blocks: Vec<Vec<u8>>,
    /// Receipt proof in the block's receipts root.
    #[serde(with = "serde_hex::bytes_list")]
    pub proof: Vec<Vec<u8>>,
    #[serde(with = "serde_hex::quantity")]
    pub tx_index: u64,
    #[serde(with = "serde_hex::quantity")]
    pub log_index: u64,
}

/// ABI encoding of `address[]` as emitted in the event data.
pub fn encode_validator_data(validators: &[[u8; 20]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + validators.len() * 32);
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&32u64.to_be_bytes());
    out.extend_from_slice(&word);
    word[24..].copy_from_slice(&(validators.len() as u64).to_be_bytes());
    out.extend_from_slice(&word);
    for validator in validators {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(validator);
        out.extend_from_slice(&word);
    }
    out
}

/// Verify every state newer than the history and append it.
pub fn verify_validator_list(
    list: &ValidatorList,
    history: &mut ValidatorHistory,
    validator_contract: &[u8; 20],
    needed_finality: u8,
) -> VerifyResult<()> {
    for state in &list.states {
        if state.block <= history.last_change() {
            continue;
        }
        let proof = state
            .proof
            .as_ref()
            .ok_or_else(|| VerifyError::missing("validator list has no proof"))?;

        let header = BlockHeader::parse(&proof.block)?;
        if header.number()? != state.block {
            return Err(VerifyError::invalid("block number mismatch"));
        }
        let mut headers = vec![header];
        for raw in &proof.finality_blocks {
            headers.push(BlockHeader::parse(raw)?);
        }
        verify_authority(&headers, history, needed_finality)
            .map_err(|e| e.context("validator change"))?;

        let path = rlp::encode_tx_path(proof.tx_index);
        let raw_receipt = trie::verify_proof(&header.receipts_root()?, &path, &proof.proof, Expected::Fetch)?
            .ok_or_else(|| VerifyError::invalid("Could not verify the merkle proof"))?;
        let receipt = Receipt::decode(raw_receipt)?;
        let log = receipt
            .logs
            .get(proof.log_index as usize)
            .ok_or_else(|| VerifyError::invalid("log index out of range"))?;

        if log.address != *validator_contract {
            return Err(VerifyError::invalid("Wrong address in log"));
        }
        if log.topics.first() != Some(&INITIATE_CHANGE_TOPIC) {
            return Err(VerifyError::invalid("Wrong topic in log"));
        }
        if log.data != encode_validator_data(&state.validators) {
            return Err(VerifyError::invalid("wrong data in log"));
        }

        debug!(block = state.block, "verified validator change");
        history.add(ValidatorTransition {
            block: state.block,
            validators: state.validators.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keccak256;
    use crate::fixtures::eth::AuraChain;

    #[test]
    fn test_initiate_change_topic() {
        assert_eq!(keccak256(b"InitiateChange(bytes32,address[])"), INITIATE_CHANGE_TOPIC);
    }

    #[test]
    fn test_history_lookup() {
        let mut history = ValidatorHistory::from_transitions(vec![
            ValidatorTransition { block: 100, validators: vec![[2; 20]] },
            ValidatorTransition { block: 0, validators: vec![[1; 20]] },
        ]);
        assert_eq!(history.last_change(), 100);
        assert_eq!(history.validators_at(99), &[[1; 20]]);
        assert_eq!(history.validators_at(100), &[[2; 20]]);

        history.add(ValidatorTransition { block: 50, validators: vec![[3; 20]] });
        assert_eq!(history.last_change(), 100);
        assert_eq!(history.validators_at(60), &[[3; 20]]);
        assert!(ValidatorHistory::default().validators_at(5).is_empty());
    }

    #[test]
    fn test_two_of_three_validators_reach_51_percent() {
        let chain = AuraChain::new(3);
        let raw = chain.sealed_chain(10, 2);
        let headers: Vec<_> = raw.iter().map(|h| BlockHeader::parse(h).unwrap()).collect();
        // 2 * 100 / 3 = 66
        assert!(verify_authority(&headers, &chain.history(), 51).is_ok());
        assert_eq!(
            verify_authority(&headers, &chain.history(), 67).unwrap_err().message,
            "not enough blocks to reach finality"
        );
        assert_eq!(signer(&headers[0]).unwrap(), chain.validator_for_step(10));
    }

    #[test]
    fn test_non_validator_seal_rejected() {
        let chain = AuraChain::new(3);
        let mut raw = chain.sealed_chain(10, 2);
        raw[1] = chain.seal_with_outsider(&raw[1]);
        let headers: Vec<_> = raw.iter().map(|h| BlockHeader::parse(h).unwrap()).collect();
        assert_eq!(
            verify_authority(&headers, &chain.history(), 51).unwrap_err().message,
            "the block was signed by the wrong key"
        );
    }

    #[test]
    fn test_broken_parent_link_rejected() {
        let chain = AuraChain::new(3);
        let first = chain.sealed_chain(10, 1).remove(0);
        let unrelated = chain.sealed_chain(20, 1).remove(0);
        let headers = vec![
            BlockHeader::parse(&first).unwrap(),
            BlockHeader::parse(&unrelated).unwrap(),
        ];
        assert_eq!(
            verify_authority(&headers, &chain.history(), 0).unwrap_err().message,
            "The parent hashes of the finality blocks don't match"
        );
    }

    #[test]
    fn test_validator_list_extends_history() {
        let chain = AuraChain::new(3);
        let new_set = vec![[0x42; 20], [0x43; 20]];
        let list = chain.validator_change(500, &new_set);
        let mut history = chain.history();

        verify_validator_list(&list, &mut history, &chain.validator_contract, 51).unwrap();
        assert_eq!(history.last_change(), 500);
        assert_eq!(history.validators_at(500), new_set.as_slice());

        // already known states are skipped
        verify_validator_list(&list, &mut history, &chain.validator_contract, 51).unwrap();

        let mut forged = chain.validator_change(600, &new_set);
        forged.states[0].validators = vec![[0x99; 20]];
        let err = verify_validator_list(&forged, &mut chain.history(), &chain.validator_contract, 51)
            .unwrap_err();
        assert_eq!(err.message, "wrong data in log");
    }
}
