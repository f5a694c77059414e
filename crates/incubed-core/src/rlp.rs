//! Recursive length prefix codec.
//!
//! Decoding never copies: every [`RlpItem`] borrows the buffer it was decoded
//! from, and list elements are located lazily by index. Every length read
//! from the input is checked against the remaining buffer before it is used,
//! so malformed or truncated input yields [`RlpError::OutOfBounds`] instead of
//! a slice past the end.

use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RlpError {
    #[error("RLP element at offset {offset} claims {claimed} bytes but only {available} are left")]
    OutOfBounds {
        offset: usize,
        claimed: usize,
        available: usize,
    },

    #[error("RLP length-of-length {0} is too large")]
    LengthTooLarge(usize),

    #[error("Expected an RLP {expected} at index {index}")]
    UnexpectedType { expected: &'static str, index: usize },

    #[error("Missing RLP element at index {index}")]
    Missing { index: usize },
}

/// A decoded element: the payload range of a byte string or of a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlpItem<'a> {
    Item(&'a [u8]),
    List(&'a [u8]),
}

impl<'a> RlpItem<'a> {
    pub fn payload(self) -> &'a [u8] {
        match self {
            RlpItem::Item(data) | RlpItem::List(data) => data,
        }
    }

    pub fn as_bytes(self) -> Option<&'a [u8]> {
        match self {
            RlpItem::Item(data) => Some(data),
            RlpItem::List(_) => None,
        }
    }

    pub fn as_list(self) -> Option<&'a [u8]> {
        match self {
            RlpItem::List(data) => Some(data),
            RlpItem::Item(_) => None,
        }
    }

    pub fn is_list(self) -> bool {
        matches!(self, RlpItem::List(_))
    }
}

/// Header of the element starting at `pos`: (is_list, payload range).
fn read_header(buf: &[u8], pos: usize) -> Result<(bool, Range<usize>), RlpError> {
    let prefix = buf[pos];
    let (is_list, start, len) = match prefix {
        0x00..=0x7f => (false, pos, 1),
        0x80..=0xb7 => (false, pos + 1, (prefix - 0x80) as usize),
        0xb8..=0xbf => {
            let ll = (prefix - 0xb7) as usize;
            (false, pos + 1 + ll, read_length(buf, pos + 1, ll)?)
        }
        0xc0..=0xf7 => (true, pos + 1, (prefix - 0xc0) as usize),
        0xf8..=0xff => {
            let ll = (prefix - 0xf7) as usize;
            (true, pos + 1 + ll, read_length(buf, pos + 1, ll)?)
        }
    };

    let end = start.checked_add(len).filter(|end| *end <= buf.len());
    match end {
        Some(end) => Ok((is_list, start..end)),
        None => Err(RlpError::OutOfBounds {
            offset: pos,
            claimed: len,
            available: buf.len().saturating_sub(start),
        }),
    }
}

fn read_length(buf: &[u8], pos: usize, len_of_len: usize) -> Result<usize, RlpError> {
    if len_of_len > std::mem::size_of::<usize>() {
        return Err(RlpError::LengthTooLarge(len_of_len));
    }
    let bytes = buf.get(pos..pos + len_of_len).ok_or(RlpError::OutOfBounds {
        offset: pos,
        claimed: len_of_len,
        available: buf.len().saturating_sub(pos),
    })?;
    Ok(bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize))
}

/// Lazy iterator over the elements of a list payload (or any concatenation
/// of encoded elements). Yields the element and its full encoded span.
pub struct RlpIter<'a> {
    buf: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> Iterator for RlpIter<'a> {
    type Item = Result<(RlpItem<'a>, Range<usize>), RlpError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.buf.len() {
            return None;
        }
        match read_header(self.buf, self.pos) {
            Ok((is_list, payload)) => {
                let span = self.pos..payload.end;
                self.pos = payload.end;
                let data = &self.buf[payload];
                let item = if is_list {
                    RlpItem::List(data)
                } else {
                    RlpItem::Item(data)
                };
                Some(Ok((item, span)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

pub fn items(buf: &[u8]) -> RlpIter<'_> {
    RlpIter {
        buf,
        pos: 0,
        failed: false,
    }
}

/// Decode the `index`-th element of `buf`. `Ok(None)` means out of range.
pub fn decode(buf: &[u8], index: usize) -> Result<Option<RlpItem<'_>>, RlpError> {
    Ok(decode_with_span(buf, index)?.map(|(item, _)| item))
}

/// Like [`decode`], also returning the encoded span (prefix included).
pub fn decode_with_span(
    buf: &[u8],
    index: usize,
) -> Result<Option<(RlpItem<'_>, Range<usize>)>, RlpError> {
    for (i, element) in items(buf).enumerate() {
        let element = element?;
        if i == index {
            return Ok(Some(element));
        }
    }
    Ok(None)
}

/// Number of elements in `buf`; validates every element header.
pub fn count(buf: &[u8]) -> Result<usize, RlpError> {
    let mut n = 0;
    for element in items(buf) {
        element?;
        n += 1;
    }
    Ok(n)
}

/// Payload of the list encoded at the start of `buf`.
pub fn decode_list(buf: &[u8]) -> Result<&[u8], RlpError> {
    match decode(buf, 0)? {
        Some(RlpItem::List(payload)) => Ok(payload),
        Some(RlpItem::Item(_)) => Err(RlpError::UnexpectedType {
            expected: "list",
            index: 0,
        }),
        None => Err(RlpError::Missing { index: 0 }),
    }
}

/// The `index`-th element of the list encoded at the start of `buf`.
pub fn decode_in_list(buf: &[u8], index: usize) -> Result<Option<RlpItem<'_>>, RlpError> {
    decode(decode_list(buf)?, index)
}

/// The `index`-th element of a list payload, required to be a byte string.
pub fn bytes_at(payload: &[u8], index: usize) -> Result<&[u8], RlpError> {
    match decode(payload, index)? {
        Some(RlpItem::Item(data)) => Ok(data),
        Some(RlpItem::List(_)) => Err(RlpError::UnexpectedType {
            expected: "byte string",
            index,
        }),
        None => Err(RlpError::Missing { index }),
    }
}

/// The `index`-th element of a list payload, required to be a list.
pub fn list_at(payload: &[u8], index: usize) -> Result<&[u8], RlpError> {
    match decode(payload, index)? {
        Some(RlpItem::List(data)) => Ok(data),
        Some(RlpItem::Item(_)) => Err(RlpError::UnexpectedType {
            expected: "list",
            index,
        }),
        None => Err(RlpError::Missing { index }),
    }
}

// --- Encoding ---

/// Append a length prefix: short form below 56 bytes, otherwise
/// `offset + 55 + len(len)` followed by the big-endian length.
pub fn encode_length(out: &mut Vec<u8>, len: usize, offset: u8) {
    if len < 56 {
        out.push(offset + len as u8);
    } else {
        let be = len.to_be_bytes();
        let significant = crate::bytes::strip_leading_zeros(&be);
        out.push(offset + 55 + significant.len() as u8);
        out.extend_from_slice(significant);
    }
}

pub fn encode_item(out: &mut Vec<u8>, data: &[u8]) {
    if data.len() == 1 && data[0] < 0x80 {
        out.push(data[0]);
    } else {
        encode_length(out, data.len(), 0x80);
        out.extend_from_slice(data);
    }
}

/// Wrap an already encoded payload into a list.
pub fn encode_list(out: &mut Vec<u8>, payload: &[u8]) {
    encode_length(out, payload.len(), 0xc0);
    out.extend_from_slice(payload);
}

/// Unsigned integer as a byte string without leading zeros (zero is empty).
pub fn encode_uint(out: &mut Vec<u8>, value: u64) {
    encode_item(out, &crate::bytes::u64_to_be_minimal(value));
}

/// Trie key of a transaction or receipt: the RLP of its index.
pub fn encode_tx_path(index: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    encode_uint(&mut out, index);
    out
}

/// Builder for a list of elements.
#[derive(Debug, Default, Clone)]
pub struct RlpList {
    payload: Vec<u8>,
}

impl RlpList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(mut self, data: &[u8]) -> Self {
        encode_item(&mut self.payload, data);
        self
    }

    pub fn uint(mut self, value: u64) -> Self {
        encode_uint(&mut self.payload, value);
        self
    }

    /// Big-endian integer given as bytes; leading zeros are dropped.
    pub fn uint_bytes(mut self, value: &[u8]) -> Self {
        encode_item(&mut self.payload, crate::bytes::strip_leading_zeros(value));
        self
    }

    /// Append an element that is already RLP encoded.
    pub fn raw(mut self, encoded: &[u8]) -> Self {
        self.payload.extend_from_slice(encoded);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 9);
        encode_list(&mut out, &self.payload);
        out
    }
}
