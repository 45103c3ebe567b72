//! 32-byte identifiers and hashing helpers.
//!
//! Every identifier on the chain is a BLAKE2b-256 digest. Distinct newtypes
//! keep block ids, transaction ids, and the various output ids from being
//! mixed up at compile time.

use blake2::{digest::consts::U32, Blake2b, Digest};
use std::fmt;

/// BLAKE2b with 256-bit output, the only hash used on the chain.
type Blake2b256 = Blake2b<U32>;

/// Hash every chunk in order and return the digest.
pub fn hash_all(chunks: &[&[u8]]) -> Hash256 {
    let mut hasher = Blake2b256::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Hash256(out)
}

macro_rules! fmt_hex {
    ($name:ident) => {
        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.as_ref()))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.as_ref()))
            }
        }
    };
}

/// A raw 32-byte BLAKE2b-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// Interpret the first eight bytes as a big-endian integer.
    ///
    /// Used to derive bounded indices (storage-proof challenges) from a
    /// digest.
    pub fn to_u64(&self) -> u64 {
        u64::from_be_bytes(self.0[0..8].try_into().unwrap())
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

fmt_hex!(Hash256);

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub Hash256);

        impl $name {
            /// Construct from a raw 32-byte array.
            pub fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(Hash256(bytes))
            }

            /// The underlying 32-byte digest.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0 .0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0 .0
            }
        }

        fmt_hex!($name);
    };
}

id_type!(
    /// Content hash of a block.
    BlockId
);
id_type!(
    /// Content hash of a transaction.
    TransactionId
);
id_type!(
    /// Identifier of a spendable coin output.
    CoinOutputId
);
id_type!(
    /// Identifier of a siafund output.
    SiafundOutputId
);
id_type!(
    /// Identifier of a file contract.
    FileContractId
);
id_type!(
    /// Commitment to a set of unlock conditions.
    UnlockHash
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_all_is_order_sensitive() {
        let a = hash_all(&[b"one", b"two"]);
        let b = hash_all(&[b"two", b"one"]);
        assert_ne!(a, b);
        assert_eq!(a, hash_all(&[b"one", b"two"]));
    }

    #[test]
    fn display_is_hex() {
        let id = BlockId::from_bytes([0xAB; 32]);
        assert_eq!(format!("{}", id), "ab".repeat(32));
    }

    #[test]
    fn to_u64_reads_leading_bytes() {
        let mut bytes = [0u8; 32];
        bytes[7] = 5;
        assert_eq!(Hash256(bytes).to_u64(), 5);
    }
}
