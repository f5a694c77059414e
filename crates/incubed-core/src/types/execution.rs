use super::serde_hex;
use crate::error::{VerifyError, VerifyResult};
use crate::rlp::{self, RlpItem, RlpList};
use serde::{Deserialize, Serialize};

/// An Ethereum account as stored in the state trie.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub nonce: u64,
    /// Balance in wei, minimal big-endian.
    pub balance: Vec<u8>,
    pub storage_root: [u8; 32],
    pub code_hash: [u8; 32],
}

impl AccountState {
    /// The keccak256 hash of empty bytes, the code hash of accounts without code.
    pub const EMPTY_CODE_HASH: [u8; 32] = [
        0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7,
        0x03, 0xc0, 0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04,
        0x5d, 0x85, 0xa4, 0x70,
    ];

    /// The root of an empty Merkle-Patricia trie.
    pub const EMPTY_STORAGE_ROOT: [u8; 32] = crate::trie::EMPTY_ROOT;

    /// Accounts that were never touched are absent from the state trie.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0
            && self.balance.is_empty()
            && self.code_hash == Self::EMPTY_CODE_HASH
            && self.storage_root == Self::EMPTY_STORAGE_ROOT
    }

    pub fn is_contract(&self) -> bool {
        self.code_hash != Self::EMPTY_CODE_HASH
    }

    /// `[nonce, balance, storageRoot, codeHash]`, the trie leaf value.
    pub fn rlp(&self) -> Vec<u8> {
        RlpList::new()
            .uint(self.nonce)
            .uint_bytes(&self.balance)
            .bytes(&self.storage_root)
            .bytes(&self.code_hash)
            .finish()
    }
}

/// One entry of `in3.proof.accounts`, shaped like an `eth_getProof` result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccountProof {
    #[serde(with = "serde_hex::fixed")]
    pub address: [u8; 20],
    #[serde(with = "serde_hex::bytes_list")]
    pub account_proof: Vec<Vec<u8>>,
    #[serde(with = "serde_hex::bytes")]
    pub balance: Vec<u8>,
    #[serde(with = "serde_hex::fixed")]
    pub code_hash: [u8; 32],
    #[serde(with = "serde_hex::bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "serde_hex::fixed")]
    pub storage_hash: [u8; 32],
    pub storage_proof: Vec<StorageProof>,
}

impl AccountProof {
    pub fn state(&self) -> VerifyResult<AccountState> {
        let nonce = crate::bytes::be_to_u64(&self.nonce)
            .ok_or_else(|| VerifyError::invalid("nonce does not fit 64 bits"))?;
        Ok(AccountState {
            nonce,
            balance: crate::bytes::strip_leading_zeros(&self.balance).to_vec(),
            storage_root: self.storage_hash,
            code_hash: self.code_hash,
        })
    }

    pub fn storage(&self, key: &[u8]) -> Option<&StorageProof> {
        let key = crate::bytes::strip_leading_zeros(key);
        self.storage_proof
            .iter()
            .find(|s| crate::bytes::strip_leading_zeros(&s.key) == key)
    }
}

/// A storage slot and the trie nodes proving it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageProof {
    #[serde(with = "serde_hex::bytes")]
    pub key: Vec<u8>,
    #[serde(with = "serde_hex::bytes")]
    pub value: Vec<u8>,
    #[serde(with = "serde_hex::bytes_list")]
    pub proof: Vec<Vec<u8>>,
}

/// A log entry emitted by a contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    #[serde(with = "serde_hex::fixed")]
    pub address: [u8; 20],
    pub topics: Vec<[u8; 32]>,
    #[serde(with = "serde_hex::bytes")]
    pub data: Vec<u8>,
}

/// A receipt decoded from its trie value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub tx_type: u8,
    /// Status byte (post-Byzantium) or intermediate state root.
    pub status_or_root: Vec<u8>,
    pub cumulative_gas_used: u64,
    pub logs: Vec<Log>,
}

impl Receipt {
    /// Decode a receipt trie value. Typed receipts (EIP-2718) carry a
    /// leading type byte below `0x80`.
    pub fn decode(data: &[u8]) -> VerifyResult<Self> {
        let (tx_type, body) = match data.first() {
            Some(t) if *t <= 0x7f => (*t, &data[1..]),
            _ => (0, data),
        };
        let payload = rlp::decode_list(body)?;
        if rlp::count(payload)? != 4 {
            return Err(VerifyError::invalid("Receipt should have 4 items"));
        }

        let cumulative_gas_used = crate::bytes::be_to_u64(rlp::bytes_at(payload, 1)?)
            .ok_or_else(|| VerifyError::invalid("cumulativeGasUsed does not fit 64 bits"))?;
        let logs = rlp::items(rlp::list_at(payload, 3)?)
            .map(|item| decode_log(item?.0))
            .collect::<VerifyResult<Vec<_>>>()?;

        Ok(Self {
            tx_type,
            status_or_root: rlp::bytes_at(payload, 0)?.to_vec(),
            cumulative_gas_used,
            logs,
        })
    }
}

fn decode_log(item: RlpItem<'_>) -> VerifyResult<Log> {
    let fields = item
        .as_list()
        .ok_or_else(|| VerifyError::invalid("Log is not a list"))?;
    if rlp::count(fields)? != 3 {
        return Err(VerifyError::invalid("Log should have 3 fields"));
    }

    let address: [u8; 20] = rlp::bytes_at(fields, 0)?
        .try_into()
        .map_err(|_| VerifyError::invalid("Log address must be 20 bytes"))?;
    let topics = rlp::items(rlp::list_at(fields, 1)?)
        .map(|topic| {
            topic?
                .0
                .as_bytes()
                .and_then(|t| <[u8; 32]>::try_from(t).ok())
                .ok_or_else(|| VerifyError::invalid("Log topic must be 32 bytes"))
        })
        .collect::<VerifyResult<Vec<_>>>()?;

    Ok(Log {
        address,
        topics,
        data: rlp::bytes_at(fields, 2)?.to_vec(),
    })
}
