//! # silo-storage
//!
//! Storage layer for the silo node.
//!
//! This crate provides a RocksDB-based storage abstraction with support for:
//! - Column families for the consensus tables
//! - Atomic batch writes
//! - Prefix iteration for height-bucketed tables
//!
//! ## Column Families
//!
//! - `CoinOutputs`: spendable coin outputs indexed by output id
//! - `SiafundOutputs`: siafund outputs indexed by output id
//! - `FileContracts`: open file contracts indexed by contract id
//! - `DelayedCoinOutputs`: delayed outputs indexed by maturity height ‖ id
//! - `DelayedBuckets`: per-height bucket markers with element counts
//! - `ContractExpirations`: window-end ‖ contract-id reverse index
//! - `Path`: canonical chain, height → block id
//! - `ProcessedBlocks`: processed blocks (with diff sets) by block id
//! - `DosBlocks`: quarantined block ids
//! - `Metadata`: scalars (siafund pool, path length)

mod batch;
mod database;
mod error;

pub use batch::WriteBatch;
pub use database::{ColumnFamily, Database};
pub use error::{StorageError, StorageResult};

/// Storage trait for abstracting database operations.
///
/// This allows for easy testing with mock implementations.
pub trait Storage: Send + Sync {
    /// Get a value by key from a column family.
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Put a key-value pair into a column family.
    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Delete a key from a column family.
    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<()>;

    /// Check if a key exists in a column family.
    fn contains(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(cf, key)?.is_some())
    }

    /// Execute a batch of writes atomically.
    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Create an iterator over a column family.
    fn iter(
        &self,
        cf: ColumnFamily,
    ) -> StorageResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>>;

    /// Create an iterator over the keys starting with `prefix`.
    fn iter_prefix(
        &self,
        cf: ColumnFamily,
        prefix: &[u8],
    ) -> StorageResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>>;
}
