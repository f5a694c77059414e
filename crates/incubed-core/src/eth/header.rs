//! RLP block headers and the cache of already verified block hashes.

use crate::bytes;
use crate::crypto::{keccak256, keccak256_concat};
use crate::error::{VerifyError, VerifyResult};
use crate::rlp::{self, RlpItem};
use std::collections::VecDeque;

pub const PARENT_HASH: usize = 0;
pub const SHA3_UNCLES: usize = 1;
pub const MINER: usize = 2;
pub const STATE_ROOT: usize = 3;
pub const TRANSACTIONS_ROOT: usize = 4;
pub const RECEIPTS_ROOT: usize = 5;
pub const NUMBER: usize = 8;
pub const EXTRA_DATA: usize = 12;
pub const SEALED_FIELD1: usize = 13;
pub const SEALED_FIELD2: usize = 14;
pub const SEALED_FIELD3: usize = 15;

/// Borrowed view over an RLP encoded header; fields are decoded on access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader<'a> {
    raw: &'a [u8],
    fields: &'a [u8],
}

impl<'a> BlockHeader<'a> {
    pub fn parse(raw: &'a [u8]) -> VerifyResult<Self> {
        let fields = rlp::decode_list(raw).map_err(|_| VerifyError::invalid("invalid blockheader"))?;
        if rlp::count(fields)? <= EXTRA_DATA {
            return Err(VerifyError::invalid("blockheader has too few fields"));
        }
        Ok(Self { raw, fields })
    }

    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    pub fn hash(&self) -> [u8; 32] {
        keccak256(self.raw)
    }

    pub fn field(&self, index: usize) -> VerifyResult<&'a [u8]> {
        Ok(rlp::bytes_at(self.fields, index)?)
    }

    fn hash_field(&self, index: usize) -> VerifyResult<[u8; 32]> {
        bytes::to_bytes32(self.field(index)?)
            .ok_or_else(|| VerifyError::invalid(format!("header field {} is not a hash", index)))
    }

    pub fn number(&self) -> VerifyResult<u64> {
        bytes::be_to_u64(self.field(NUMBER)?)
            .ok_or_else(|| VerifyError::invalid("Could not rlpdecode the blocknumber"))
    }

    pub fn parent_hash(&self) -> VerifyResult<[u8; 32]> {
        self.hash_field(PARENT_HASH)
    }

    pub fn uncles_hash(&self) -> VerifyResult<[u8; 32]> {
        self.hash_field(SHA3_UNCLES)
    }

    pub fn miner(&self) -> VerifyResult<&'a [u8]> {
        self.field(MINER)
    }

    pub fn state_root(&self) -> VerifyResult<[u8; 32]> {
        self.hash_field(STATE_ROOT)
    }

    pub fn transactions_root(&self) -> VerifyResult<[u8; 32]> {
        self.hash_field(TRANSACTIONS_ROOT)
    }

    pub fn receipts_root(&self) -> VerifyResult<[u8; 32]> {
        self.hash_field(RECEIPTS_ROOT)
    }

    /// Aura step, the first sealed field.
    pub fn step(&self) -> VerifyResult<u64> {
        bytes::be_to_u64(self.field(SEALED_FIELD1)?)
            .ok_or_else(|| VerifyError::invalid("invalid aura step"))
    }

    /// Hash an aura validator signs: the header without its sealed fields,
    /// extended by the empty-steps field when present.
    pub fn bare_hash(&self) -> VerifyResult<[u8; 32]> {
        let (_, extra) = rlp::decode_with_span(self.fields, EXTRA_DATA)?
            .ok_or(rlp::RlpError::Missing { index: EXTRA_DATA })?;
        let mut bare = Vec::with_capacity(extra.end + 9);
        rlp::encode_list(&mut bare, &self.fields[..extra.end]);
        let bare_hash = keccak256(&bare);

        match rlp::decode_with_span(self.fields, SEALED_FIELD3)? {
            Some((_, span)) => Ok(keccak256_concat(&[&bare_hash, &self.fields[span]])),
            None => Ok(bare_hash),
        }
    }

    /// The 65-byte aura seal `r ‖ s ‖ v`.
    pub fn seal_signature(&self) -> VerifyResult<([u8; 64], u8)> {
        match rlp::decode(self.fields, SEALED_FIELD2)? {
            Some(RlpItem::Item(sig)) if sig.len() == 65 => {
                let mut rs = [0u8; 64];
                rs.copy_from_slice(&sig[..64]);
                Ok((rs, sig[64]))
            }
            _ => Err(VerifyError::invalid("missing aura seal signature")),
        }
    }
}

/// Bounded map of block number to verified hash. A header whose number is
/// cached must hash to the cached value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifiedHashes {
    capacity: usize,
    entries: VecDeque<(u64, [u8; 32])>,
}

impl VerifiedHashes {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, number: u64) -> Option<[u8; 32]> {
        self.entries.iter().find(|(n, _)| *n == number).map(|(_, h)| *h)
    }

    pub fn insert(&mut self, number: u64, hash: [u8; 32]) {
        if self.capacity == 0 {
            return;
        }
        self.entries.retain(|(n, _)| *n != number);
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((number, hash));
    }

    /// Hex hashes for the `verifiedHashes` request field.
    pub fn hashes(&self) -> Vec<String> {
        self.entries.iter().map(|(_, h)| bytes::to_hex(h)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rlp::RlpList;

    fn header(number: u64, seal: Option<Vec<u8>>) -> Vec<u8> {
        let mut list = RlpList::new()
            .bytes(&[1; 32])
            .bytes(&[2; 32])
            .bytes(&[3; 20])
            .bytes(&[4; 32])
            .bytes(&[5; 32])
            .bytes(&[6; 32])
            .bytes(&[0; 256])
            .uint(1)
            .uint(number)
            .uint(8_000_000)
            .uint(21_000)
            .uint(1_600_000_000)
            .bytes(b"extra");
        if let Some(sig) = seal {
            list = list.uint(7).bytes(&sig);
        }
        list.finish()
    }

    #[test]
    fn test_field_access() {
        let raw = header(1234, None);
        let h = BlockHeader::parse(&raw).unwrap();
        assert_eq!(h.number().unwrap(), 1234);
        assert_eq!(h.parent_hash().unwrap(), [1; 32]);
        assert_eq!(h.state_root().unwrap(), [4; 32]);
        assert_eq!(h.transactions_root().unwrap(), [5; 32]);
        assert_eq!(h.receipts_root().unwrap(), [6; 32]);
        assert_eq!(h.miner().unwrap(), &[3; 20]);
        assert_eq!(h.hash(), keccak256(&raw));
        assert!(h.step().is_err());
    }

    #[test]
    fn test_rejects_short_header() {
        let raw = RlpList::new().uint(1).uint(2).finish();
        assert!(BlockHeader::parse(&raw).is_err());
        assert!(BlockHeader::parse(&[0x85, 1, 2]).is_err());
    }

    #[test]
    fn test_bare_hash_excludes_seal() {
        let unsealed = header(9, None);
        let sealed = header(9, Some(vec![0xab; 65]));
        let h = BlockHeader::parse(&sealed).unwrap();
        assert_eq!(h.bare_hash().unwrap(), keccak256(&unsealed));
        assert_eq!(h.step().unwrap(), 7);
        let (rs, v) = h.seal_signature().unwrap();
        assert_eq!(rs, [0xab; 64]);
        assert_eq!(v, 0xab);
    }

    #[test]
    fn test_verified_hashes_bounded() {
        let mut cache = VerifiedHashes::new(2);
        cache.insert(1, [1; 32]);
        cache.insert(2, [2; 32]);
        cache.insert(1, [9; 32]);
        assert_eq!(cache.get(1), Some([9; 32]));
        cache.insert(3, [3; 32]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(2), None);

        let mut disabled = VerifiedHashes::new(0);
        disabled.insert(1, [1; 32]);
        assert!(disabled.is_empty());
    }
}
