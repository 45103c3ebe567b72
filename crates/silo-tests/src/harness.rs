//! Test harness for integration tests.
//!
//! Provides a consensus set over a temporary database, a permissive unlock
//! verifier, and block builders, so tests read as chain scripts.

use silo_consensus::UnlockVerifier;
use silo_state::{ChainConfig, ConsensusSet, NewTipReport, StateResult};
use silo_storage::{ColumnFamily, Database, Storage};
use silo_types::{
    Block, BlockId, CoinOutput, CoinOutputId, Currency, Hash256, SiafundOutput, SiafundOutputId,
    Signature, Transaction, UnlockConditions, UnlockHash,
};
use std::sync::Arc;
use tempfile::TempDir;

/// Maturity delay used by test chains; small enough that maturation is
/// reachable in a handful of blocks.
pub const TEST_MATURITY_DELAY: u64 = 3;

/// Accepts every signature; tests exercise the engine, not the crypto.
pub struct AlwaysValidUnlock;

impl UnlockVerifier for AlwaysValidUnlock {
    fn verify_unlock(&self, _: &UnlockConditions, _: &[Signature], _: &Hash256) -> bool {
        true
    }
}

/// The unlock conditions every test output commits to.
pub fn test_unlock_conditions() -> UnlockConditions {
    UnlockConditions {
        timelock: 0,
        public_keys: vec![vec![0x7E]],
        signatures_required: 1,
    }
}

/// The unlock hash every test output commits to.
pub fn test_unlock_hash() -> UnlockHash {
    test_unlock_conditions().unlock_hash()
}

/// Test database wrapper that cleans up on drop.
pub struct TestDatabase {
    db: Database,
    _temp_dir: TempDir,
}

impl TestDatabase {
    /// Create a new test database in a temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let db = Database::open(temp_dir.path()).expect("failed to open database");
        Self {
            db,
            _temp_dir: temp_dir,
        }
    }

    /// Get a clone of the database (shares the underlying connection).
    pub fn db(&self) -> Database {
        self.db.clone()
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// A consensus set over a throwaway database, plus table inspectors.
pub struct ChainHarness {
    pub set: ConsensusSet,
    pub config: ChainConfig,
    db: Database,
    _storage: TestDatabase,
}

impl ChainHarness {
    /// A chain with no genesis allocations.
    pub fn new() -> Self {
        Self::with_allocations(&[])
    }

    /// A chain whose genesis allocates the given coin values to the test
    /// unlock hash.
    pub fn with_allocations(values: &[u64]) -> Self {
        Self::with_chain(values, &[])
    }

    /// A chain with both coin and siafund genesis allocations.
    pub fn with_chain(coin_values: &[u64], siafund_counts: &[u64]) -> Self {
        let storage = TestDatabase::new();
        let db = storage.db();
        let config = ChainConfig {
            maturity_delay: TEST_MATURITY_DELAY,
            record_checksums: true,
            genesis_timestamp: 1_000,
            genesis_coin_allocations: coin_values
                .iter()
                .map(|&value| CoinOutput {
                    value: Currency::from(value),
                    unlock_hash: test_unlock_hash(),
                })
                .collect(),
            genesis_siafund_allocations: siafund_counts
                .iter()
                .map(|&count| SiafundOutput {
                    count,
                    unlock_hash: test_unlock_hash(),
                    claim_start: Currency::ZERO,
                })
                .collect(),
        };
        let set = ConsensusSet::new(
            Arc::new(storage.db()),
            config.clone(),
            Arc::new(AlwaysValidUnlock),
        )
        .expect("failed to open consensus set");
        Self {
            set,
            config,
            db,
            _storage: storage,
        }
    }

    /// Id of the genesis block.
    pub fn genesis_id(&self) -> BlockId {
        self.config.genesis_block().id()
    }

    /// Id of the genesis coin allocation at `index`.
    pub fn genesis_coin_id(&self, index: u64) -> CoinOutputId {
        ChainConfig::genesis_coin_output_id(&self.genesis_id(), index)
    }

    /// Id of the genesis siafund allocation at `index`.
    pub fn genesis_siafund_id(&self, index: u64) -> SiafundOutputId {
        ChainConfig::genesis_siafund_output_id(&self.genesis_id(), index)
    }

    pub fn tip(&self) -> BlockId {
        self.set.current_tip().expect("tip")
    }

    pub fn height(&self) -> u64 {
        self.set.current_height().expect("height")
    }

    pub fn checksum(&self) -> Hash256 {
        self.set.consensus_checksum().expect("checksum")
    }

    /// Build a block on an explicit parent. The nonce keeps same-shaped
    /// blocks on different forks distinct.
    pub fn block(
        &self,
        parent: BlockId,
        nonce: u64,
        payouts: &[u64],
        transactions: Vec<Transaction>,
    ) -> Block {
        Block {
            parent_id: parent,
            timestamp: 1_000 + nonce,
            nonce,
            miner_payouts: payouts
                .iter()
                .map(|&value| CoinOutput {
                    value: Currency::from(value),
                    unlock_hash: test_unlock_hash(),
                })
                .collect(),
            transactions,
        }
    }

    /// Build and accept a block extending the current tip.
    pub fn extend(
        &self,
        nonce: u64,
        payouts: &[u64],
        transactions: Vec<Transaction>,
    ) -> StateResult<NewTipReport> {
        let block = self.block(self.tip(), nonce, payouts, transactions);
        self.set.accept_block(block)
    }

    /// Accept `count` empty blocks on the tip.
    pub fn extend_empty(&self, count: u64) {
        for offset in 0..count {
            self.extend(1_000_000 + self.height() * 1_000 + offset, &[], Vec::new())
                .expect("empty block should apply");
        }
    }

    // --- Table inspectors (read the storage the engine writes) ---

    /// Spendable coin output by id, straight from the table.
    pub fn coin_output(&self, id: &CoinOutputId) -> Option<CoinOutput> {
        self.db
            .get(ColumnFamily::CoinOutputs, id.as_ref())
            .expect("storage read")
            .map(|bytes| CoinOutput::from_bytes(&bytes).expect("decode"))
    }

    /// Siafund output by id, straight from the table.
    pub fn siafund_output(&self, id: &SiafundOutputId) -> Option<SiafundOutput> {
        self.db
            .get(ColumnFamily::SiafundOutputs, id.as_ref())
            .expect("storage read")
            .map(|bytes| SiafundOutput::from_bytes(&bytes).expect("decode"))
    }

    /// Number of spendable coin outputs.
    pub fn coin_output_count(&self) -> usize {
        self.db
            .iter(ColumnFamily::CoinOutputs)
            .expect("storage iter")
            .count()
    }

    /// Sum of all spendable coin outputs.
    pub fn total_coin_value(&self) -> Currency {
        self.db
            .iter(ColumnFamily::CoinOutputs)
            .expect("storage iter")
            .map(|(_, value)| CoinOutput::from_bytes(&value).expect("decode").value)
            .sum()
    }

    /// Sum of all delayed coin outputs across every bucket.
    pub fn total_delayed_value(&self) -> Currency {
        self.db
            .iter(ColumnFamily::DelayedCoinOutputs)
            .expect("storage iter")
            .map(|(_, value)| CoinOutput::from_bytes(&value).expect("decode").value)
            .sum()
    }

    /// Whether the delayed bucket for a maturity height exists.
    pub fn delayed_bucket_exists(&self, height: u64) -> bool {
        self.db
            .get(ColumnFamily::DelayedBuckets, &height.to_be_bytes())
            .expect("storage read")
            .is_some()
    }

    /// Delayed outputs maturing at `height`, in key order.
    pub fn delayed_outputs(&self, height: u64) -> Vec<(CoinOutputId, CoinOutput)> {
        self.db
            .iter_prefix(ColumnFamily::DelayedCoinOutputs, &height.to_be_bytes())
            .expect("storage iter")
            .map(|(key, value)| {
                let id = CoinOutputId::from_bytes(key[8..].try_into().expect("key shape"));
                (id, CoinOutput::from_bytes(&value).expect("decode"))
            })
            .collect()
    }

    /// Whether a file contract is open.
    pub fn has_file_contract(&self, id: &silo_types::FileContractId) -> bool {
        self.db
            .get(ColumnFamily::FileContracts, id.as_ref())
            .expect("storage read")
            .is_some()
    }

    /// Contract ids indexed as expiring at `height`.
    pub fn expiring_contracts(&self, height: u64) -> Vec<silo_types::FileContractId> {
        self.db
            .iter_prefix(ColumnFamily::ContractExpirations, &height.to_be_bytes())
            .expect("storage iter")
            .map(|(key, _)| {
                silo_types::FileContractId::from_bytes(key[8..].try_into().expect("key shape"))
            })
            .collect()
    }

    /// Current siafund pool value.
    pub fn siafund_pool(&self) -> Currency {
        self.db
            .get(ColumnFamily::Metadata, b"siafund_pool")
            .expect("storage read")
            .map(|bytes| Currency::from_be_bytes(bytes.try_into().expect("pool shape")))
            .unwrap_or(Currency::ZERO)
    }

    /// Canonical block id at a path height.
    pub fn path_at(&self, height: u64) -> Option<BlockId> {
        self.db
            .get(ColumnFamily::Path, &height.to_be_bytes())
            .expect("storage read")
            .map(|bytes| BlockId::from_bytes(bytes.try_into().expect("path shape")))
    }
}

impl Default for ChainHarness {
    fn default() -> Self {
        Self::new()
    }
}
