//! Unlock conditions.
//!
//! An output commits to its spending conditions by storing only their hash.
//! The spender reveals the conditions and signatures in the input; the engine
//! checks the hash binding and the timelock, and delegates signature
//! verification to the crypto collaborator.

use crate::{hash_all, CodecError, Decoder, Encoder, UnlockHash};

/// A detached signature, opaque to the consensus engine.
pub type Signature = Vec<u8>;

/// Conditions that must be met to spend an output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnlockConditions {
    /// Height before which the output cannot be spent.
    pub timelock: u64,
    /// Public keys allowed to sign, opaque bytes.
    pub public_keys: Vec<Vec<u8>>,
    /// How many of the keys must provide a valid signature.
    pub signatures_required: u64,
}

impl UnlockConditions {
    pub fn encode(&self, enc: &mut Encoder) {
        enc.write_u64(self.timelock);
        enc.write_len(self.public_keys.len());
        for key in &self.public_keys {
            enc.write_var_bytes(key);
        }
        enc.write_u64(self.signatures_required);
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let timelock = dec.read_u64()?;
        let count = dec.read_len()?;
        let mut public_keys = Vec::with_capacity(count);
        for _ in 0..count {
            public_keys.push(dec.read_var_bytes()?);
        }
        Ok(Self {
            timelock,
            public_keys,
            signatures_required: dec.read_u64()?,
        })
    }

    /// The commitment an output stores for these conditions.
    pub fn unlock_hash(&self) -> UnlockHash {
        let mut enc = Encoder::new();
        self.encode(&mut enc);
        UnlockHash(hash_all(&[b"unlock-conditions", &enc.into_bytes()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlock_hash_is_stable_and_binding() {
        let conditions = UnlockConditions {
            timelock: 10,
            public_keys: vec![vec![1, 2, 3]],
            signatures_required: 1,
        };
        assert_eq!(conditions.unlock_hash(), conditions.unlock_hash());

        let mut altered = conditions.clone();
        altered.timelock = 11;
        assert_ne!(conditions.unlock_hash(), altered.unlock_hash());
    }
}
