use super::merkle;
use super::serialize::{BlockHeader, HEADER_SIZE};
use super::target::{check_new_target, meets_target, target_from_bits, DAP_LENGTH};
use super::tx::Transaction;
use crate::bytes::reversed;
use crate::error::{VerifyError, VerifyResult};
use crate::types::BtcProof;
use alloy_primitives::U256;

/// Check the header's proof of work and, when given, that its target is the
/// expected one. Returns the display-order hash and the header's target.
pub fn verify_pow(header: &BlockHeader<'_>, expected_target: Option<U256>) -> VerifyResult<([u8; 32], U256)> {
    let target = target_from_bits(header.bits());
    let hash = header.hash();
    if !meets_target(&hash, target) {
        return Err(VerifyError::invalid(
            "Invalid proof of work. the hash is greater than the target",
        ));
    }
    if let Some(expected) = expected_target {
        if expected != target {
            return Err(VerifyError::invalid("Invalid target"));
        }
    }
    Ok((hash, target))
}

/// Block height committed in the coinbase input (BIP34). The coinbase and
/// its merkle path at index 0 come with the proof.
pub fn block_number(header: &BlockHeader<'_>, proof: &BtcProof) -> VerifyResult<u64> {
    let raw = header.raw();
    if raw[0] == 1 && raw[1..4] == [0, 0, 0] {
        return Err(VerifyError::unsupported("no pre bip34 support"));
    }

    let merkle_proof = proof
        .cbtx_merkle_proof
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| VerifyError::missing("missing merkle proof"))?;
    let cbtx = proof
        .cbtx
        .as_deref()
        .filter(|tx| !tx.is_empty())
        .ok_or_else(|| VerifyError::missing("missing coinbase tx"))?;

    let tx = Transaction::parse(cbtx).map_err(|e| e.context("invalid coinbase tx"))?;
    if !merkle::verify_proof(&header.merkle_root(), merkle_proof, 0, &reversed(&tx.txid())) {
        return Err(VerifyError::invalid("merkleProof failed!"));
    }
    if tx.inputs.len() != 1 {
        return Err(VerifyError::invalid("vin count needs to be 1 for coinbase tx"));
    }

    match tx.inputs[0].script {
        [3, a, b, c, ..] => Ok(u64::from(*a) | u64::from(*b) << 8 | u64::from(*c) << 16),
        _ => Err(VerifyError::invalid("invalid coinbase signature")),
    }
}

/// Walk `finality` headers on top of the block. Each must link to its
/// predecessor and meet the current target; crossing a DAP boundary moves to
/// the new target (within the 4x bound) and restarts the count.
pub fn check_finality(
    block_hash: &[u8; 32],
    block_number: u64,
    finality: usize,
    final_headers: &[u8],
    target: U256,
) -> VerifyResult<()> {
    if finality == 0 {
        return if final_headers.is_empty() {
            Ok(())
        } else {
            Err(VerifyError::invalid(
                "got finality headers even though they were not expected",
            ))
        };
    }

    let mut parent = *block_hash;
    let mut target = target;
    let mut number = block_number + 1;
    let mut remaining = finality;
    let mut offset = 0usize;

    while remaining > 0 {
        let raw = final_headers
            .get(offset..offset + HEADER_SIZE)
            .ok_or_else(|| VerifyError::invalid("Not enough finality blockheaders"))?;
        let header = BlockHeader::parse(raw)?;

        if number % DAP_LENGTH == 0 {
            let next = target_from_bits(header.bits());
            check_new_target(target, next)?;
            target = next;
            remaining = finality;
        }
        if reversed(&header.parent_hash()) != parent {
            return Err(VerifyError::invalid("wrong parent_hash in finality block"));
        }
        parent = verify_pow(&header, Some(target))?.0;

        remaining -= 1;
        number += 1;
        offset += HEADER_SIZE;
    }

    if offset < final_headers.len() {
        return Err(VerifyError::invalid("too many final headers"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::btc::{coinbase_tx, mine_chain, mine_header, REGTEST_BITS};

    #[test]
    fn test_pow_and_expected_target() {
        let header = mine_header([0u8; 32], [1u8; 32], REGTEST_BITS);
        let parsed = BlockHeader::parse(&header).unwrap();
        let (hash, target) = verify_pow(&parsed, None).unwrap();
        assert_eq!(hash, parsed.hash());
        assert_eq!(target, target_from_bits(REGTEST_BITS));
        assert_eq!(
            verify_pow(&parsed, Some(target / U256::from(2u8))).unwrap_err().message,
            "Invalid target"
        );
    }

    #[test]
    fn test_insufficient_work_rejected() {
        // mainnet target on an unmined header
        let mut header = [0u8; 80];
        header[0] = 2;
        header[72..76].copy_from_slice(&0x1d00ffffu32.to_le_bytes());
        let parsed = BlockHeader::parse(&header).unwrap();
        assert!(verify_pow(&parsed, None).unwrap_err().message.starts_with("Invalid proof of work"));
    }

    #[test]
    fn test_block_number_from_coinbase() {
        let cbtx = coinbase_tx(700_123);
        let txid = Transaction::parse(&cbtx).unwrap().txid();
        let leaves = [reversed(&txid), [9u8; 32]];
        let header = mine_header([0u8; 32], merkle::root(&leaves), REGTEST_BITS);
        let parsed = BlockHeader::parse(&header).unwrap();

        let mut proof = BtcProof {
            cbtx: Some(cbtx),
            cbtx_merkle_proof: Some(merkle::proof(&leaves, 0)),
            ..Default::default()
        };
        assert_eq!(block_number(&parsed, &proof).unwrap(), 700_123);

        proof.cbtx_merkle_proof = Some(vec![0u8; 32]);
        assert_eq!(block_number(&parsed, &proof).unwrap_err().message, "merkleProof failed!");
        proof.cbtx_merkle_proof = None;
        assert_eq!(
            block_number(&parsed, &proof).unwrap_err().kind,
            crate::error::ErrorKind::ProofMissing
        );
    }

    #[test]
    fn test_finality_chain() {
        let chain = mine_chain([0u8; 32], 4, REGTEST_BITS);
        let first = BlockHeader::parse(&chain[0]).unwrap();
        let target = target_from_bits(REGTEST_BITS);
        let finals: Vec<u8> = chain[1..].concat();

        assert!(check_finality(&first.hash(), 100, 3, &finals, target).is_ok());
        assert_eq!(
            check_finality(&first.hash(), 100, 3, &finals[..160], target).unwrap_err().message,
            "Not enough finality blockheaders"
        );
        assert_eq!(
            check_finality(&first.hash(), 100, 2, &finals, target).unwrap_err().message,
            "too many final headers"
        );
        assert_eq!(
            check_finality(&[7u8; 32], 100, 3, &finals, target).unwrap_err().message,
            "wrong parent_hash in finality block"
        );
        assert!(check_finality(&first.hash(), 100, 0, &finals, target).is_err());
        assert!(check_finality(&first.hash(), 100, 0, &[], target).is_ok());
    }
}
