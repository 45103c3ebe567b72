//! Coin and siafund outputs.

use crate::{CodecError, Currency, Decoder, Encoder, Hash256, UnlockHash};

/// A spendable amount of the native currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinOutput {
    /// Amount held by the output.
    pub value: Currency,
    /// Commitment to the conditions required to spend it.
    pub unlock_hash: UnlockHash,
}

impl CoinOutput {
    pub fn encode(&self, enc: &mut Encoder) {
        enc.write_currency(self.value);
        enc.write_hash(self.unlock_hash.as_bytes());
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            value: dec.read_currency()?,
            unlock_hash: UnlockHash(Hash256(dec.read_hash()?)),
        })
    }

    /// Standalone encoding, used as a storage table value.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode(&mut enc);
        enc.into_bytes()
    }

    /// Decode a standalone encoding, rejecting trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut dec = Decoder::new(bytes);
        let out = Self::decode(&mut dec)?;
        dec.finish()?;
        Ok(out)
    }
}

/// A share of the siafund pool.
///
/// `claim_start` records the pool value at the moment the output was created;
/// spending the output pays out the pool growth since then, pro rata by
/// `count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiafundOutput {
    /// Number of siafund shares held.
    pub count: u64,
    /// Commitment to the conditions required to spend it.
    pub unlock_hash: UnlockHash,
    /// Siafund pool value when this output was created.
    pub claim_start: Currency,
}

impl SiafundOutput {
    pub fn encode(&self, enc: &mut Encoder) {
        enc.write_u64(self.count);
        enc.write_hash(self.unlock_hash.as_bytes());
        enc.write_currency(self.claim_start);
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            count: dec.read_u64()?,
            unlock_hash: UnlockHash(Hash256(dec.read_hash()?)),
            claim_start: dec.read_currency()?,
        })
    }

    /// Standalone encoding, used as a storage table value.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode(&mut enc);
        enc.into_bytes()
    }

    /// Decode a standalone encoding, rejecting trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut dec = Decoder::new(bytes);
        let out = Self::decode(&mut dec)?;
        dec.finish()?;
        Ok(out)
    }
}
