//! Canonical binary encoding.
//!
//! Big-endian fixed-width integers, u32-prefixed variable byte strings, and
//! u32-prefixed lists. The encoding is canonical: a value has exactly one
//! byte representation, which makes content hashes and the persisted diff
//! sets stable across nodes and restarts.

use crate::Currency;
use thiserror::Error;

/// Decoding failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Ran out of bytes mid-value.
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEnd(usize),

    /// Input has bytes left over after the value was decoded.
    #[error("trailing bytes after decoded value")]
    TrailingBytes,

    /// A declared length exceeds the remaining input.
    #[error("declared length {declared} exceeds remaining input {remaining}")]
    LengthOverflow { declared: usize, remaining: usize },

    /// A field held a value outside its domain.
    #[error("invalid field: {0}")]
    InvalidField(&'static str),
}

/// Append-only encoder.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Create an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the encoder and return the bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_currency(&mut self, value: Currency) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a fixed 32-byte field (ids, digests).
    pub fn write_hash(&mut self, bytes: &[u8; 32]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a fixed-width field of any size (e.g. proof segments).
    pub fn write_fixed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a u32 length prefix followed by the bytes.
    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_len(bytes.len());
        self.buf.extend_from_slice(bytes);
    }

    /// Write a list length prefix. Callers encode the elements themselves.
    pub fn write_len(&mut self, len: usize) {
        self.buf.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

/// Cursor-style decoder over a byte slice.
#[derive(Debug)]
pub struct Decoder<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    /// Create a decoder over the input.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], CodecError> {
        if self.offset + count > self.bytes.len() {
            return Err(CodecError::UnexpectedEnd(self.offset));
        }
        let slice = &self.bytes[self.offset..self.offset + count];
        self.offset += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_currency(&mut self) -> Result<Currency, CodecError> {
        Ok(Currency::from_be_bytes(self.take(16)?.try_into().unwrap()))
    }

    /// Read a fixed 32-byte field.
    pub fn read_hash(&mut self) -> Result<[u8; 32], CodecError> {
        Ok(self.take(32)?.try_into().unwrap())
    }

    /// Read a fixed-width field into the provided buffer.
    pub fn read_fixed(&mut self, out: &mut [u8]) -> Result<(), CodecError> {
        out.copy_from_slice(self.take(out.len())?);
        Ok(())
    }

    /// Read a u32 length prefix followed by that many bytes.
    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_len()?;
        Ok(self.take(len)?.to_vec())
    }

    /// Read a list length prefix, bounds-checked against the remaining input.
    pub fn read_len(&mut self) -> Result<usize, CodecError> {
        let len = u32::from_be_bytes(self.take(4)?.try_into().unwrap()) as usize;
        let remaining = self.bytes.len() - self.offset;
        if len > remaining {
            return Err(CodecError::LengthOverflow {
                declared: len,
                remaining,
            });
        }
        Ok(len)
    }

    /// Number of bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    /// Fail unless the input was fully consumed.
    pub fn finish(self) -> Result<(), CodecError> {
        if self.remaining() != 0 {
            return Err(CodecError::TrailingBytes);
        }
        Ok(())
    }
}
