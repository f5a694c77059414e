//! Proof-of-work targets and the cache of verified targets per difficulty
//! adjustment period (DAP, 2016 blocks).

use crate::error::{VerifyError, VerifyResult};
use alloy_primitives::U256;
use std::collections::BTreeMap;
use tracing::debug;

pub const DAP_LENGTH: u64 = 2016;

/// Bits of the minimum difficulty target on mainnet.
pub const MAX_TARGET_BITS: u32 = 0x1d00ffff;

/// Checkpoints of mainnet: 2-byte big endian DAP followed by the header's
/// 4 bits bytes.
const MAINNET_CHECKPOINTS: &str = concat!(
    "000affff001d", "000fffff001d", "00145746651c", "0019a7bc201c", "001e64ba0e1c",
    "00235a0c011c", "0028ed66471b", "002d56720e1b", "0032cb04041b", "0037cd2d011b",
    "003cfa98001b", "00418521131a", "0046864a091a", "004bcaf00d1a", "0050d7690d1a",
    "005587320b1a", "005a5f8b0a1a", "005fc93c081a", "0064087e051a", "006962fa041a",
    "006e5c98041a", "007394de011a", "007815de001a", "007d32875419", "0082cab01619",
    "008742120619", "008c2cf50119", "009199db0019", "009642286918", "009ba2ae3a18",
    "00a093b81f18", "00a5747b1b18", "00aa87bb1818", "00aff0171718", "00b48e411618",
    "00b9c14d1318", "00be89b21018", "00c31bb30918", "00c8c3a40618", "00cd36840518",
    "00d228720518", "00d7c4400418", "00dc858b0318", "00e1937e0218", "00e63e1b0218",
    "00eb308d0118", "00f00b310118", "00f54bce0018", "00fa8c577e17", "00ff494a5117",
    "0104495a4117", "01097b4f2f17", "010e91c12517", "0113f41e3717", "0118505b2e17",
    "011d38ff2917", "01229b0d1f17", "0127f5ab1717", "012c3eb21517", "0131ff321217",
    "0136bc201317",
);

/// Chain id of bitcoin mainnet in the node registry.
pub const BTC_MAINNET: u64 = 0x99;

pub fn dap(block_number: u64) -> u64 {
    block_number / DAP_LENGTH
}

/// Expand compact bits into the 256-bit target. Negative or overflowing
/// encodings yield zero, which no hash can meet.
pub fn target_from_bits(bits: u32) -> U256 {
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x007f_ffff;
    if bits & 0x0080_0000 != 0 || mantissa == 0 {
        return U256::ZERO;
    }
    if exponent <= 3 {
        return U256::from(mantissa >> (8 * (3 - exponent)));
    }
    let shift = 8 * (exponent - 3);
    if shift + 24 > 256 {
        return U256::ZERO;
    }
    U256::from(mantissa) << shift
}

/// Whether a display-order block hash meets `target`.
pub fn meets_target(hash: &[u8; 32], target: U256) -> bool {
    U256::from_be_bytes(*hash) <= target
}

/// Difficulty relative to the minimum target, truncated like the
/// `difficulty` field of bitcoind's JSON.
pub fn difficulty(target: U256) -> u64 {
    if target.is_zero() {
        return 0;
    }
    let ratio = target_from_bits(MAX_TARGET_BITS) / target;
    u64::try_from(ratio).unwrap_or(u64::MAX)
}

/// A retarget may change the target by at most a factor of four.
pub fn check_new_target(old: U256, new: U256) -> VerifyResult<()> {
    if old.saturating_mul(U256::from(4u8)) < new {
        return Err(VerifyError::invalid("new target is more than 4 times the old target"));
    }
    if old / U256::from(4u8) > new {
        return Err(VerifyError::invalid("new target is less than one 4th of the old target"));
    }
    Ok(())
}

/// Verified targets keyed by DAP, stored as compact bits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetCache {
    targets: BTreeMap<u64, u32>,
}

impl TargetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in checkpoints for `chain_id`; empty for unknown chains.
    pub fn with_checkpoints(chain_id: u64) -> Self {
        if chain_id != BTC_MAINNET {
            return Self::new();
        }
        // the constant is well-formed hex of whole entries
        hex::decode(MAINNET_CHECKPOINTS)
            .ok()
            .and_then(|bytes| Self::from_bytes(&bytes))
            .unwrap_or_default()
    }

    pub fn storage_key(chain_id: u64) -> String {
        format!("btc_target_{}", chain_id)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn get(&self, dap: u64) -> Option<u32> {
        self.targets.get(&dap).copied()
    }

    pub fn insert(&mut self, dap: u64, bits: u32) {
        if self.targets.insert(dap, bits) != Some(bits) {
            debug!(dap, bits = %format!("{:08x}", bits), "recorded verified target");
        }
    }

    /// The verified DAP nearest to `dap` with its bits.
    pub fn closest(&self, dap: u64) -> Option<(u64, u32)> {
        self.targets
            .iter()
            .min_by_key(|(d, _)| d.abs_diff(dap))
            .map(|(d, bits)| (*d, *bits))
    }

    /// Six bytes per entry, the layout of the checkpoint table.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.targets.len() * 6);
        for (dap, bits) in &self.targets {
            out.extend_from_slice(&(*dap as u16).to_be_bytes());
            out.extend_from_slice(&bits.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() % 6 != 0 {
            return None;
        }
        let targets = data
            .chunks(6)
            .map(|e| {
                (
                    u16::from_be_bytes([e[0], e[1]]) as u64,
                    u32::from_le_bytes([e[2], e[3], e[4], e[5]]),
                )
            })
            .collect();
        Some(Self { targets })
    }
}
