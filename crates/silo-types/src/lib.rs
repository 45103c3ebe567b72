//! # silo-types
//!
//! Chain primitives for the silo blockchain.
//!
//! This crate provides:
//! - 32-byte content identifiers (blocks, transactions, outputs, contracts)
//! - The `Currency` type with checked arithmetic
//! - Coin outputs, siafund outputs, file contracts, transactions, blocks
//! - The canonical binary encoding used for hashing and persistence
//!
//! All derived identifiers (transaction outputs, miner payouts, storage-proof
//! payouts, siafund claims) are BLAKE2b-256 digests over a domain tag, the
//! parent identifier, and an index, so they are deterministic across nodes.

mod block;
mod contract;
mod currency;
mod encoding;
mod hash;
mod outputs;
mod transaction;
mod unlock;

pub use block::Block;
pub use contract::{FileContract, FileContractRevision, StorageProof, SEGMENT_SIZE};
pub use currency::Currency;
pub use encoding::{CodecError, Decoder, Encoder};
pub use hash::{
    hash_all, BlockId, CoinOutputId, FileContractId, Hash256, SiafundOutputId, TransactionId,
    UnlockHash,
};
pub use outputs::{CoinOutput, SiafundOutput};
pub use transaction::{CoinInput, SiafundInput, Transaction};
pub use unlock::{Signature, UnlockConditions};
