//! Bitcoin wire layouts: the 80-byte block header, compact-size integers
//! and a bounds-checked reader used by the transaction parser.

use crate::bytes::{self, reversed};
use crate::crypto::sha256d;
use crate::error::{VerifyError, VerifyResult};
use crate::json;
use serde_json::Value;

pub const HEADER_SIZE: usize = 80;

/// View over a serialized block header. Hashes are kept in internal
/// (little endian) byte order; [`BlockHeader::hash`] returns display order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader<'a> {
    raw: &'a [u8],
}

impl<'a> BlockHeader<'a> {
    /// Uses the first 80 bytes of `data`, which may be a whole block.
    pub fn parse(data: &'a [u8]) -> VerifyResult<Self> {
        data.get(..HEADER_SIZE)
            .map(|raw| Self { raw })
            .ok_or_else(|| VerifyError::invalid("invalid blockheader"))
    }

    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    pub fn version(&self) -> u32 {
        self.u32_at(0)
    }

    pub fn parent_hash(&self) -> [u8; 32] {
        self.hash_at(4)
    }

    pub fn merkle_root(&self) -> [u8; 32] {
        self.hash_at(36)
    }

    pub fn time(&self) -> u32 {
        self.u32_at(68)
    }

    /// Compact target as stored in the header.
    pub fn bits(&self) -> u32 {
        self.u32_at(72)
    }

    pub fn nonce(&self) -> u32 {
        self.u32_at(76)
    }

    /// Block hash in display (big endian) order.
    pub fn hash(&self) -> [u8; 32] {
        reversed(&sha256d(self.raw))
    }

    fn u32_at(&self, offset: usize) -> u32 {
        bytes::le_u32(self.raw, offset).unwrap_or_default()
    }

    fn hash_at(&self, offset: usize) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.raw[offset..offset + 32]);
        out
    }
}

impl<'a> From<&'a [u8; HEADER_SIZE]> for BlockHeader<'a> {
    fn from(raw: &'a [u8; HEADER_SIZE]) -> Self {
        Self { raw }
    }
}

/// Rebuild the 80-byte header from a verbose `getblock`/`getblockheader`
/// result.
pub fn header_from_json(obj: &Value) -> VerifyResult<[u8; HEADER_SIZE]> {
    let mut out = [0u8; HEADER_SIZE];

    let version = match json::opt_str(obj, "versionHex") {
        Some(v) => u32::from_str_radix(v.trim_start_matches("0x"), 16)
            .map_err(|_| VerifyError::invalid("invalid versionHex"))?,
        None => json::u64_field(obj, "version")? as u32,
    };
    out[0..4].copy_from_slice(&version.to_le_bytes());

    // the genesis block has no parent
    if let Some(parent) = json::opt_str(obj, "previousblockhash") {
        out[4..36].copy_from_slice(&reversed(&bytes::hex_to_bytes32(parent)?));
    }
    out[36..68].copy_from_slice(&reversed(&json::hash_field(obj, "merkleroot")?));

    let time = u32::try_from(json::u64_field(obj, "time")?)
        .map_err(|_| VerifyError::invalid("time does not fit 32 bits"))?;
    out[68..72].copy_from_slice(&time.to_le_bytes());

    let bits = u32::from_str_radix(json::str_field(obj, "bits")?.trim_start_matches("0x"), 16)
        .map_err(|_| VerifyError::invalid("invalid bits"))?;
    out[72..76].copy_from_slice(&bits.to_le_bytes());

    let nonce = u32::try_from(json::u64_field(obj, "nonce")?)
        .map_err(|_| VerifyError::invalid("nonce does not fit 32 bits"))?;
    out[76..80].copy_from_slice(&nonce.to_le_bytes());

    Ok(out)
}

/// Append a compact-size integer.
pub fn write_varint(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Forward-only reader; every read is checked against the remaining input.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn peek(&self, offset: usize) -> Option<u8> {
        self.data.get(self.pos + offset).copied()
    }

    pub fn take(&mut self, len: usize) -> VerifyResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                VerifyError::invalid(format!(
                    "unexpected end of data: need {} bytes at offset {}",
                    len, self.pos
                ))
            })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn u32_le(&mut self) -> VerifyResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64_le(&mut self) -> VerifyResult<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn varint(&mut self) -> VerifyResult<u64> {
        let prefix = self.take(1)?[0];
        Ok(match prefix {
            0xfd => {
                let b = self.take(2)?;
                u16::from_le_bytes([b[0], b[1]]) as u64
            }
            0xfe => self.u32_le()? as u64,
            0xff => self.u64_le()?,
            n => n as u64,
        })
    }

    /// A varint length followed by that many bytes.
    pub fn var_bytes(&mut self) -> VerifyResult<&'a [u8]> {
        let len = self.varint()?;
        let len = usize::try_from(len).map_err(|_| VerifyError::invalid("length overflow"))?;
        self.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use serde_json::json;

    const GENESIS: [u8; 80] = hex!(
        "01000000" "0000000000000000000000000000000000000000000000000000000000000000"
        "3ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a"
        "29ab5f49" "ffff001d" "1dac2b7c"
    );

    #[test]
    fn test_genesis_fields() {
        let header = BlockHeader::parse(&GENESIS).unwrap();
        assert_eq!(header.version(), 1);
        assert_eq!(header.bits(), 0x1d00ffff);
        assert_eq!(header.time(), 1231006505);
        assert_eq!(header.nonce(), 2083236893);
        assert_eq!(header.parent_hash(), [0u8; 32]);
        assert_eq!(
            header.hash(),
            hex!("000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f")
        );
        assert!(BlockHeader::parse(&GENESIS[..79]).is_err());
    }

    #[test]
    fn test_header_from_json_matches_raw() {
        let obj = json!({
            "hash": "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
            "version": 1,
            "versionHex": "00000001",
            "merkleroot": "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
            "time": 1231006505,
            "nonce": 2083236893,
            "bits": "1d00ffff"
        });
        assert_eq!(header_from_json(&obj).unwrap(), GENESIS);
    }

    #[test]
    fn test_varint_widths() {
        for (value, len) in [(0u64, 1), (0xfc, 1), (0xfd, 3), (0xffff, 3), (0x10000, 5), (1 << 32, 9)] {
            let mut out = Vec::new();
            write_varint(&mut out, value);
            assert_eq!(out.len(), len);
            let mut reader = Reader::new(&out);
            assert_eq!(reader.varint().unwrap(), value);
            assert_eq!(reader.remaining(), 0);
        }
    }

    #[test]
    fn test_reader_rejects_overrun() {
        let mut reader = Reader::new(&[0x05, 1, 2]);
        assert!(reader.var_bytes().is_err());
        let mut reader = Reader::new(&[0xfe, 1]);
        assert!(reader.varint().is_err());
    }
}
