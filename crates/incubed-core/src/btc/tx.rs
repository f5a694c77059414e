use super::serialize::{Reader, HEADER_SIZE};
use crate::bytes::reversed;
use crate::crypto::sha256d;
use crate::error::{VerifyError, VerifyResult};
use std::ops::Range;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxInput<'a> {
    /// Spent transaction id, internal byte order.
    pub prev_tx: [u8; 32],
    pub prev_index: u32,
    pub script: &'a [u8],
    pub sequence: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOutput<'a> {
    /// Value in satoshi.
    pub value: u64,
    pub script: &'a [u8],
}

/// A parsed transaction borrowing its serialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction<'a> {
    raw: &'a [u8],
    pub version: u32,
    pub inputs: Vec<TxInput<'a>>,
    pub outputs: Vec<TxOutput<'a>>,
    pub witnesses: Vec<Vec<&'a [u8]>>,
    pub lock_time: u32,
    /// Span of the input and output section in `raw`.
    body: Range<usize>,
    witness_len: usize,
}

impl<'a> Transaction<'a> {
    /// Parse a single transaction; trailing bytes are rejected.
    pub fn parse(data: &'a [u8]) -> VerifyResult<Self> {
        let mut reader = Reader::new(data);
        let tx = Self::read(&mut reader)?;
        if reader.remaining() != 0 {
            return Err(VerifyError::invalid("trailing bytes after transaction"));
        }
        Ok(tx)
    }

    fn read(reader: &mut Reader<'a>) -> VerifyResult<Self> {
        let start = reader.position();
        let version = reader.u32_le()?;
        let segwit = reader.peek(0) == Some(0) && reader.peek(1) == Some(1);
        if segwit {
            reader.take(2)?;
        }

        let body_start = reader.position();
        let input_count = reader.varint()?;
        let mut inputs = Vec::new();
        for _ in 0..input_count {
            let prev = reader.take(32)?;
            let mut prev_tx = [0u8; 32];
            prev_tx.copy_from_slice(prev);
            inputs.push(TxInput {
                prev_tx,
                prev_index: reader.u32_le()?,
                script: reader.var_bytes()?,
                sequence: reader.u32_le()?,
            });
        }

        let output_count = reader.varint()?;
        let mut outputs = Vec::new();
        for _ in 0..output_count {
            outputs.push(TxOutput {
                value: reader.u64_le()?,
                script: reader.var_bytes()?,
            });
        }
        let body_end = reader.position();

        let mut witnesses = Vec::new();
        if segwit {
            for _ in 0..inputs.len() {
                let items = reader.varint()?;
                let mut stack = Vec::new();
                for _ in 0..items {
                    stack.push(reader.var_bytes()?);
                }
                witnesses.push(stack);
            }
        }
        let witness_len = reader.position() - body_end;

        let lock_time = reader.u32_le()?;
        let raw = &reader.data()[start..reader.position()];

        Ok(Self {
            raw,
            version,
            inputs,
            outputs,
            witnesses,
            lock_time,
            body: body_start - start..body_end - start,
            witness_len,
        })
    }

    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    pub fn is_segwit(&self) -> bool {
        !self.witnesses.is_empty()
    }

    /// Serialization without marker, flag and witnesses.
    pub fn stripped(&self) -> Vec<u8> {
        let body = &self.raw[self.body.clone()];
        let mut out = Vec::with_capacity(body.len() + 8);
        out.extend_from_slice(&self.raw[..4]);
        out.extend_from_slice(body);
        out.extend_from_slice(&self.raw[self.raw.len() - 4..]);
        out
    }

    /// Transaction id in display order (witness data excluded).
    pub fn txid(&self) -> [u8; 32] {
        reversed(&sha256d(&self.stripped()))
    }

    /// Witness transaction hash in display order.
    pub fn hash(&self) -> [u8; 32] {
        reversed(&sha256d(self.raw))
    }

    pub fn size(&self) -> usize {
        self.raw.len()
    }

    pub fn weight(&self) -> usize {
        if self.is_segwit() {
            // marker and flag are witness data
            (self.raw.len() - self.witness_len - 2) * 3 + self.raw.len()
        } else {
            self.raw.len() * 4
        }
    }

    pub fn vsize(&self) -> usize {
        (self.weight() + 3) / 4
    }
}

/// Parse every transaction of a serialized block (header included).
pub fn block_transactions(block: &[u8]) -> VerifyResult<Vec<Transaction<'_>>> {
    let body = block
        .get(HEADER_SIZE..)
        .ok_or_else(|| VerifyError::invalid("invalid blockheader"))?;
    let mut reader = Reader::new(body);
    let count = reader.varint()?;
    let mut txs = Vec::new();
    for _ in 0..count {
        txs.push(Transaction::read(&mut reader)?);
    }
    if reader.remaining() != 0 {
        return Err(VerifyError::invalid("trailing bytes after the last transaction"));
    }
    Ok(txs)
}
