//! The consensus state store.
//!
//! Five object tables (coin outputs, siafund outputs, file contracts,
//! delayed coin outputs, contract expirations), the siafund pool scalar, the
//! current path, the processed-block map, and the quarantine set, all over
//! the storage trait.
//!
//! Exactly one write transaction is open while a block's diff set is being
//! committed or reverted. The transaction is an in-memory overlay: reads
//! during application observe in-transaction writes, commit flushes one
//! atomic write batch, rollback drops the overlay. A transient batch-commit
//! failure is retried once; a second failure escalates to corruption.
//!
//! Every table op enforces its sanity contract (insert-existing,
//! delete-missing, bucket shape) as a hard `Corruption` error.

use crate::processed::ProcessedBlock;
use crate::{StateError, StateResult};
use silo_storage::{ColumnFamily, Storage, StorageResult, WriteBatch};
use silo_types::{
    hash_all, BlockId, CoinOutput, CoinOutputId, Currency, FileContract, FileContractId, Hash256,
    SiafundOutput, SiafundOutputId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

/// Metadata keys.
const KEY_SIAFUND_POOL: &[u8] = b"siafund_pool";
const KEY_PATH_LENGTH: &[u8] = b"path_length";

/// In-memory overlay of an open write transaction.
///
/// `None` marks a pending delete.
#[derive(Debug, Default)]
struct TxOverlay {
    writes: HashMap<(ColumnFamily, Vec<u8>), Option<Vec<u8>>>,
}

/// Transactional store for the consensus tables.
pub struct StateStore {
    storage: Arc<dyn Storage>,
    tx: Option<TxOverlay>,
}

impl StateStore {
    /// Create a store over the given storage backend.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage, tx: None }
    }

    /// Run a storage operation, retrying once before escalating.
    fn with_retry<T>(&self, op: impl Fn(&dyn Storage) -> StorageResult<T>) -> StateResult<T> {
        match op(self.storage.as_ref()) {
            Ok(value) => Ok(value),
            Err(first) => {
                warn!(error = %first, "storage operation failed, retrying");
                op(self.storage.as_ref()).map_err(|second| {
                    StateError::corruption(format!(
                        "storage failed twice: {first}; then: {second}"
                    ))
                })
            }
        }
    }

    // --- Transaction management ---

    /// Open the write transaction.
    pub fn begin(&mut self) -> StateResult<()> {
        if self.tx.is_some() {
            return Err(StateError::corruption(
                "opening a transaction while one is already open",
            ));
        }
        self.tx = Some(TxOverlay::default());
        Ok(())
    }

    /// Whether a write transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Flush the open transaction as one atomic batch.
    pub fn commit(&mut self) -> StateResult<()> {
        let overlay = self
            .tx
            .take()
            .ok_or_else(|| StateError::corruption("committing without an open transaction"))?;
        self.with_retry(|storage| {
            let mut batch = WriteBatch::new();
            for ((cf, key), value) in &overlay.writes {
                match value {
                    Some(bytes) => batch.put(*cf, key.clone(), bytes.clone()),
                    None => batch.delete(*cf, key.clone()),
                }
            }
            storage.write_batch(batch)
        })
    }

    /// Drop the open transaction without writing.
    pub fn rollback(&mut self) {
        self.tx = None;
    }

    // --- Raw access (overlay-aware) ---

    fn read(&self, cf: ColumnFamily, key: &[u8]) -> StateResult<Option<Vec<u8>>> {
        if let Some(overlay) = &self.tx {
            if let Some(entry) = overlay.writes.get(&(cf, key.to_vec())) {
                return Ok(entry.clone());
            }
        }
        self.with_retry(|storage| storage.get(cf, key))
    }

    fn exists(&self, cf: ColumnFamily, key: &[u8]) -> StateResult<bool> {
        Ok(self.read(cf, key)?.is_some())
    }

    fn write(&mut self, cf: ColumnFamily, key: Vec<u8>, value: Vec<u8>) -> StateResult<()> {
        let overlay = self
            .tx
            .as_mut()
            .ok_or_else(|| StateError::corruption("write outside of a transaction"))?;
        overlay.writes.insert((cf, key), Some(value));
        Ok(())
    }

    fn remove(&mut self, cf: ColumnFamily, key: Vec<u8>) -> StateResult<()> {
        let overlay = self
            .tx
            .as_mut()
            .ok_or_else(|| StateError::corruption("delete outside of a transaction"))?;
        overlay.writes.insert((cf, key), None);
        Ok(())
    }

    /// All entries of a column family under a prefix, with the overlay
    /// merged in, sorted by key.
    fn prefixed_entries(
        &self,
        cf: ColumnFamily,
        prefix: &[u8],
    ) -> StateResult<BTreeMap<Vec<u8>, Vec<u8>>> {
        let mut entries: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        let stored: Vec<(Vec<u8>, Vec<u8>)> = self.with_retry(|storage| {
            Ok(storage.iter_prefix(cf, prefix)?.collect())
        })?;
        for (key, value) in stored {
            entries.insert(key, value);
        }
        if let Some(overlay) = &self.tx {
            for ((ocf, key), value) in &overlay.writes {
                if *ocf != cf || !key.starts_with(prefix) {
                    continue;
                }
                match value {
                    Some(bytes) => {
                        entries.insert(key.clone(), bytes.clone());
                    }
                    None => {
                        entries.remove(key);
                    }
                }
            }
        }
        Ok(entries)
    }

    // --- Coin outputs ---

    pub fn coin_output(&self, id: &CoinOutputId) -> StateResult<Option<CoinOutput>> {
        match self.read(ColumnFamily::CoinOutputs, id.as_ref())? {
            Some(bytes) => Ok(Some(CoinOutput::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn insert_coin_output(&mut self, id: &CoinOutputId, output: &CoinOutput) -> StateResult<()> {
        if self.exists(ColumnFamily::CoinOutputs, id.as_ref())? {
            return Err(StateError::corruption(format!(
                "adding a coin output that already exists: {id}"
            )));
        }
        self.write(
            ColumnFamily::CoinOutputs,
            id.as_ref().to_vec(),
            output.to_bytes(),
        )
    }

    pub fn remove_coin_output(&mut self, id: &CoinOutputId) -> StateResult<()> {
        if !self.exists(ColumnFamily::CoinOutputs, id.as_ref())? {
            return Err(StateError::corruption(format!(
                "removing a coin output that does not exist: {id}"
            )));
        }
        self.remove(ColumnFamily::CoinOutputs, id.as_ref().to_vec())
    }

    // --- Siafund outputs ---

    pub fn siafund_output(&self, id: &SiafundOutputId) -> StateResult<Option<SiafundOutput>> {
        match self.read(ColumnFamily::SiafundOutputs, id.as_ref())? {
            Some(bytes) => Ok(Some(SiafundOutput::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn insert_siafund_output(
        &mut self,
        id: &SiafundOutputId,
        output: &SiafundOutput,
    ) -> StateResult<()> {
        if self.exists(ColumnFamily::SiafundOutputs, id.as_ref())? {
            return Err(StateError::corruption(format!(
                "adding a siafund output that already exists: {id}"
            )));
        }
        self.write(
            ColumnFamily::SiafundOutputs,
            id.as_ref().to_vec(),
            output.to_bytes(),
        )
    }

    pub fn remove_siafund_output(&mut self, id: &SiafundOutputId) -> StateResult<()> {
        if !self.exists(ColumnFamily::SiafundOutputs, id.as_ref())? {
            return Err(StateError::corruption(format!(
                "removing a siafund output that does not exist: {id}"
            )));
        }
        self.remove(ColumnFamily::SiafundOutputs, id.as_ref().to_vec())
    }

    // --- File contracts and the expiration index ---

    fn expiration_key(window_end: u64, id: &FileContractId) -> Vec<u8> {
        let mut key = Vec::with_capacity(40);
        key.extend_from_slice(&window_end.to_be_bytes());
        key.extend_from_slice(id.as_ref());
        key
    }

    pub fn file_contract(&self, id: &FileContractId) -> StateResult<Option<FileContract>> {
        match self.read(ColumnFamily::FileContracts, id.as_ref())? {
            Some(bytes) => Ok(Some(FileContract::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert a contract and its expiration-index entry.
    pub fn insert_file_contract(
        &mut self,
        id: &FileContractId,
        contract: &FileContract,
    ) -> StateResult<()> {
        if self.exists(ColumnFamily::FileContracts, id.as_ref())? {
            return Err(StateError::corruption(format!(
                "adding a file contract that already exists: {id}"
            )));
        }
        let expiration = Self::expiration_key(contract.window_end, id);
        if self.exists(ColumnFamily::ContractExpirations, &expiration)? {
            return Err(StateError::corruption(format!(
                "contract expiration entry already exists: {id}"
            )));
        }
        self.write(
            ColumnFamily::FileContracts,
            id.as_ref().to_vec(),
            contract.to_bytes(),
        )?;
        self.write(ColumnFamily::ContractExpirations, expiration, Vec::new())
    }

    /// Remove a contract and its expiration-index entry.
    ///
    /// The caller supplies the contract (from the diff or a lookup) so the
    /// index entry at its window end can be located.
    pub fn remove_file_contract(
        &mut self,
        id: &FileContractId,
        contract: &FileContract,
    ) -> StateResult<()> {
        if !self.exists(ColumnFamily::FileContracts, id.as_ref())? {
            return Err(StateError::corruption(format!(
                "removing a file contract that does not exist: {id}"
            )));
        }
        let expiration = Self::expiration_key(contract.window_end, id);
        if !self.exists(ColumnFamily::ContractExpirations, &expiration)? {
            return Err(StateError::corruption(format!(
                "contract has no expiration entry at its window end: {id}"
            )));
        }
        self.remove(ColumnFamily::FileContracts, id.as_ref().to_vec())?;
        self.remove(ColumnFamily::ContractExpirations, expiration)
    }

    /// Ids of contracts expiring at the given height, sorted.
    pub fn expiring_contracts(&self, window_end: u64) -> StateResult<Vec<FileContractId>> {
        let prefix = window_end.to_be_bytes();
        let entries = self.prefixed_entries(ColumnFamily::ContractExpirations, &prefix)?;
        entries
            .keys()
            .map(|key| {
                let bytes: [u8; 32] = key[8..]
                    .try_into()
                    .map_err(|_| StateError::corruption("malformed expiration key"))?;
                Ok(FileContractId::from_bytes(bytes))
            })
            .collect()
    }

    // --- Delayed coin outputs ---

    fn delayed_key(height: u64, id: &CoinOutputId) -> Vec<u8> {
        let mut key = Vec::with_capacity(40);
        key.extend_from_slice(&height.to_be_bytes());
        key.extend_from_slice(id.as_ref());
        key
    }

    pub fn delayed_bucket_exists(&self, height: u64) -> StateResult<bool> {
        self.exists(ColumnFamily::DelayedBuckets, &height.to_be_bytes())
    }

    /// Number of outputs in the bucket. The bucket must exist.
    pub fn delayed_bucket_len(&self, height: u64) -> StateResult<u64> {
        let bytes = self
            .read(ColumnFamily::DelayedBuckets, &height.to_be_bytes())?
            .ok_or_else(|| {
                StateError::corruption(format!("sizing a delayed bucket that does not exist: {height}"))
            })?;
        let bytes: [u8; 8] = bytes
            .try_into()
            .map_err(|_| StateError::corruption("malformed delayed bucket count"))?;
        Ok(u64::from_be_bytes(bytes))
    }

    fn set_delayed_bucket_len(&mut self, height: u64, len: u64) -> StateResult<()> {
        self.write(
            ColumnFamily::DelayedBuckets,
            height.to_be_bytes().to_vec(),
            len.to_be_bytes().to_vec(),
        )
    }

    /// Create the (empty) bucket for a maturity height.
    pub fn create_delayed_bucket(&mut self, height: u64) -> StateResult<()> {
        if self.delayed_bucket_exists(height)? {
            return Err(StateError::corruption(format!(
                "creating a delayed bucket that already exists: {height}"
            )));
        }
        self.set_delayed_bucket_len(height, 0)
    }

    /// Delete a bucket; it must exist and be empty.
    pub fn delete_delayed_bucket(&mut self, height: u64) -> StateResult<()> {
        let len = self.delayed_bucket_len(height)?;
        if len != 0 {
            return Err(StateError::corruption(format!(
                "deleting a delayed bucket that is not empty: {height} holds {len}"
            )));
        }
        self.remove(ColumnFamily::DelayedBuckets, height.to_be_bytes().to_vec())
    }

    pub fn insert_delayed_output(
        &mut self,
        height: u64,
        id: &CoinOutputId,
        output: &CoinOutput,
    ) -> StateResult<()> {
        if !self.delayed_bucket_exists(height)? {
            return Err(StateError::corruption(format!(
                "delayed output submitted to a missing bucket: {height}"
            )));
        }
        let key = Self::delayed_key(height, id);
        if self.exists(ColumnFamily::DelayedCoinOutputs, &key)? {
            return Err(StateError::corruption(format!(
                "adding a delayed output that already exists: {id}"
            )));
        }
        let len = self.delayed_bucket_len(height)?;
        self.write(ColumnFamily::DelayedCoinOutputs, key, output.to_bytes())?;
        self.set_delayed_bucket_len(height, len + 1)
    }

    pub fn remove_delayed_output(&mut self, height: u64, id: &CoinOutputId) -> StateResult<()> {
        if !self.delayed_bucket_exists(height)? {
            return Err(StateError::corruption(format!(
                "delayed output removed from a missing bucket: {height}"
            )));
        }
        let key = Self::delayed_key(height, id);
        if !self.exists(ColumnFamily::DelayedCoinOutputs, &key)? {
            return Err(StateError::corruption(format!(
                "removing a delayed output that does not exist: {id}"
            )));
        }
        let len = self.delayed_bucket_len(height)?;
        self.remove(ColumnFamily::DelayedCoinOutputs, key)?;
        self.set_delayed_bucket_len(height, len - 1)
    }

    /// Entries of a maturity bucket, sorted by output id.
    pub fn delayed_bucket_entries(
        &self,
        height: u64,
    ) -> StateResult<Vec<(CoinOutputId, CoinOutput)>> {
        let prefix = height.to_be_bytes();
        let entries = self.prefixed_entries(ColumnFamily::DelayedCoinOutputs, &prefix)?;
        entries
            .into_iter()
            .map(|(key, value)| {
                let bytes: [u8; 32] = key[8..]
                    .try_into()
                    .map_err(|_| StateError::corruption("malformed delayed output key"))?;
                Ok((CoinOutputId::from_bytes(bytes), CoinOutput::from_bytes(&value)?))
            })
            .collect()
    }

    // --- Siafund pool ---

    pub fn siafund_pool(&self) -> StateResult<Currency> {
        match self.read(ColumnFamily::Metadata, KEY_SIAFUND_POOL)? {
            Some(bytes) => {
                let bytes: [u8; 16] = bytes
                    .try_into()
                    .map_err(|_| StateError::corruption("malformed siafund pool value"))?;
                Ok(Currency::from_be_bytes(bytes))
            }
            None => Ok(Currency::ZERO),
        }
    }

    pub fn set_siafund_pool(&mut self, value: Currency) -> StateResult<()> {
        self.write(
            ColumnFamily::Metadata,
            KEY_SIAFUND_POOL.to_vec(),
            value.to_be_bytes().to_vec(),
        )
    }

    // --- Current path ---

    pub fn path_length(&self) -> StateResult<u64> {
        match self.read(ColumnFamily::Metadata, KEY_PATH_LENGTH)? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| StateError::corruption("malformed path length"))?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    fn set_path_length(&mut self, len: u64) -> StateResult<()> {
        self.write(
            ColumnFamily::Metadata,
            KEY_PATH_LENGTH.to_vec(),
            len.to_be_bytes().to_vec(),
        )
    }

    /// Id of the canonical block at a height, if within the path.
    pub fn path_block_id(&self, height: u64) -> StateResult<Option<BlockId>> {
        match self.read(ColumnFamily::Path, &height.to_be_bytes())? {
            Some(bytes) => {
                let bytes: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| StateError::corruption("malformed path entry"))?;
                Ok(Some(BlockId::from_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    /// Id of the current tip. The path is never empty after genesis install.
    pub fn tip(&self) -> StateResult<BlockId> {
        let len = self.path_length()?;
        if len == 0 {
            return Err(StateError::corruption("current path is empty"));
        }
        self.path_block_id(len - 1)?
            .ok_or_else(|| StateError::corruption("path entry missing at tip height"))
    }

    /// Height of the current tip.
    pub fn tip_height(&self) -> StateResult<u64> {
        let len = self.path_length()?;
        if len == 0 {
            return Err(StateError::corruption("current path is empty"));
        }
        Ok(len - 1)
    }

    /// Append a block id to the path.
    pub fn push_path(&mut self, id: &BlockId) -> StateResult<()> {
        let len = self.path_length()?;
        self.write(
            ColumnFamily::Path,
            len.to_be_bytes().to_vec(),
            id.as_ref().to_vec(),
        )?;
        self.set_path_length(len + 1)
    }

    /// Remove and return the tip of the path.
    pub fn pop_path(&mut self) -> StateResult<BlockId> {
        let len = self.path_length()?;
        if len == 0 {
            return Err(StateError::corruption("popping an empty path"));
        }
        let id = self
            .path_block_id(len - 1)?
            .ok_or_else(|| StateError::corruption("path entry missing at tip height"))?;
        self.remove(ColumnFamily::Path, (len - 1).to_be_bytes().to_vec())?;
        self.set_path_length(len - 1)?;
        Ok(id)
    }

    // --- Processed-block map ---

    pub fn processed_block(&self, id: &BlockId) -> StateResult<Option<ProcessedBlock>> {
        match self.read(ColumnFamily::ProcessedBlocks, id.as_ref())? {
            Some(bytes) => Ok(Some(ProcessedBlock::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn has_processed_block(&self, id: &BlockId) -> StateResult<bool> {
        self.exists(ColumnFamily::ProcessedBlocks, id.as_ref())
    }

    pub fn put_processed_block(&mut self, pb: &ProcessedBlock) -> StateResult<()> {
        self.write(
            ColumnFamily::ProcessedBlocks,
            pb.id.as_ref().to_vec(),
            pb.to_bytes(),
        )
    }

    pub fn remove_processed_block(&mut self, id: &BlockId) -> StateResult<()> {
        self.remove(ColumnFamily::ProcessedBlocks, id.as_ref().to_vec())
    }

    // --- Quarantine set ---

    pub fn add_dos_block(&mut self, id: &BlockId) -> StateResult<()> {
        self.write(ColumnFamily::DosBlocks, id.as_ref().to_vec(), Vec::new())
    }

    pub fn is_dos_block(&self, id: &BlockId) -> StateResult<bool> {
        self.exists(ColumnFamily::DosBlocks, id.as_ref())
    }

    // --- Checksums ---

    /// Deterministic digest over the consensus tables, the pool, and the
    /// path. Two stores with byte-identical consensus state produce the same
    /// checksum. Observes the open transaction's overlay, so the applier can
    /// record the post-block checksum before committing.
    pub fn consensus_checksum(&self) -> StateResult<Hash256> {
        let mut digest = hash_all(&[b"consensus-checksum"]);
        for cf in [
            ColumnFamily::CoinOutputs,
            ColumnFamily::SiafundOutputs,
            ColumnFamily::FileContracts,
            ColumnFamily::DelayedCoinOutputs,
            ColumnFamily::DelayedBuckets,
            ColumnFamily::ContractExpirations,
            ColumnFamily::Path,
        ] {
            digest = hash_all(&[digest.as_ref(), cf.name().as_bytes()]);
            for (key, value) in self.prefixed_entries(cf, &[])? {
                digest = hash_all(&[digest.as_ref(), &key, &value]);
            }
        }
        let pool = self.siafund_pool()?;
        let path_length = self.path_length()?;
        Ok(hash_all(&[
            digest.as_ref(),
            &pool.to_be_bytes(),
            &path_length.to_be_bytes(),
        ]))
    }
}
