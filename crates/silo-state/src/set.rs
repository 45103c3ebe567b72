//! The consensus set.
//!
//! Owns the whole consensus state behind one coarse lock: admission checks,
//! block application, reorgs, quarantine, and subscriber notification. A
//! single writer thread drives `accept_block`; readers snapshot under the
//! same lock and never observe a half-applied block.

use crate::diffs::{CoinOutputDiff, DiffDirection, DiffSet, DiffSummary, SiafundOutputDiff};
use crate::processed::ProcessedBlock;
use crate::store::StateStore;
use crate::subscribe::{ConsensusChange, ConsensusSubscriber, SubscriberHub};
use crate::{BlockRejection, StateError, StateResult};
use parking_lot::Mutex;
use silo_consensus::params::DEFAULT_MATURITY_DELAY;
use silo_consensus::UnlockVerifier;
use silo_storage::Storage;
use silo_types::{
    hash_all, Block, BlockId, CoinOutput, CoinOutputId, SiafundOutput, SiafundOutputId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Chain-level configuration.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Blocks between creation and spendability of delayed outputs.
    pub maturity_delay: u64,
    /// Record a post-application state checksum on every processed block.
    /// Costly; intended for tests and debugging.
    pub record_checksums: bool,
    /// Timestamp of the genesis block.
    pub genesis_timestamp: u64,
    /// Coin outputs spendable from genesis.
    pub genesis_coin_allocations: Vec<CoinOutput>,
    /// Siafund outputs allocated at genesis (claim start zero).
    pub genesis_siafund_allocations: Vec<SiafundOutput>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            maturity_delay: DEFAULT_MATURITY_DELAY,
            record_checksums: false,
            genesis_timestamp: 0,
            genesis_coin_allocations: Vec::new(),
            genesis_siafund_allocations: Vec::new(),
        }
    }
}

impl ChainConfig {
    /// The genesis block this configuration describes.
    pub fn genesis_block(&self) -> Block {
        Block {
            parent_id: BlockId::default(),
            timestamp: self.genesis_timestamp,
            nonce: 0,
            miner_payouts: Vec::new(),
            transactions: Vec::new(),
        }
    }

    /// Id of the genesis coin allocation at `index`.
    pub fn genesis_coin_output_id(genesis_id: &BlockId, index: u64) -> CoinOutputId {
        CoinOutputId(hash_all(&[
            b"genesis-coin",
            genesis_id.as_ref(),
            &index.to_be_bytes(),
        ]))
    }

    /// Id of the genesis siafund allocation at `index`.
    pub fn genesis_siafund_output_id(genesis_id: &BlockId, index: u64) -> SiafundOutputId {
        SiafundOutputId(hash_all(&[
            b"genesis-siafund",
            genesis_id.as_ref(),
            &index.to_be_bytes(),
        ]))
    }
}

/// Outcome of accepting a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTipReport {
    /// The canonical tip after acceptance.
    pub tip: BlockId,
    /// Height of the tip.
    pub height: u64,
    /// Blocks reverted from the path, newest first.
    pub reverted: Vec<BlockId>,
    /// Blocks applied to the path, oldest first. Empty when the block was
    /// held as a sidechain block.
    pub applied: Vec<BlockId>,
}

/// The mutable consensus state, owned by the set and passed by reference.
pub(crate) struct ConsensusState {
    pub(crate) store: StateStore,
    pub(crate) maturity_delay: u64,
    pub(crate) record_checksums: bool,
    pub(crate) verifier: Arc<dyn UnlockVerifier + Send + Sync>,
}

/// Source of candidate blocks for the writer loop.
pub trait BlockSource {
    /// The next block to process, or `None` when exhausted.
    fn next_block(&mut self) -> Option<Block>;
}

/// The consensus set facade.
pub struct ConsensusSet {
    state: Mutex<ConsensusState>,
    hub: SubscriberHub,
    poisoned: AtomicBool,
}

impl ConsensusSet {
    /// Open the consensus set, installing genesis on first use.
    pub fn new(
        storage: Arc<dyn Storage>,
        config: ChainConfig,
        verifier: Arc<dyn UnlockVerifier + Send + Sync>,
    ) -> StateResult<Self> {
        let mut state = ConsensusState {
            store: StateStore::new(storage),
            maturity_delay: config.maturity_delay,
            record_checksums: config.record_checksums,
            verifier,
        };

        let genesis_id = config.genesis_block().id();
        if state.store.path_length()? == 0 {
            state.install_genesis(&config)?;
        } else if state.store.path_block_id(0)? != Some(genesis_id) {
            return Err(StateError::corruption(
                "stored chain does not match the configured genesis",
            ));
        }

        Ok(Self {
            state: Mutex::new(state),
            hub: SubscriberHub::new(),
            poisoned: AtomicBool::new(false),
        })
    }

    /// Accept a candidate block: extend the chain, trigger a reorg, or hold
    /// it as a sidechain block. Rejections quarantine the block; corruption
    /// poisons the set.
    pub fn accept_block(&self, block: Block) -> StateResult<NewTipReport> {
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(StateError::corruption(
                "consensus set is poisoned; resync from a trusted checkpoint",
            ));
        }

        let mut state = self.state.lock();
        match state.accept(block) {
            Ok((report, change)) => {
                // Published after the commit, still under the consensus
                // lock: changes reach subscribers exactly once, in order.
                if let Some(change) = change {
                    self.hub.publish(change);
                }
                Ok(report)
            }
            Err(err) => {
                if err.is_fatal() {
                    self.poisoned.store(true, Ordering::SeqCst);
                    error!(error = %err, "consensus corruption; the set stops accepting blocks");
                }
                Err(err)
            }
        }
    }

    /// Id of the canonical tip.
    pub fn current_tip(&self) -> StateResult<BlockId> {
        self.state.lock().store.tip()
    }

    /// Height of the canonical tip.
    pub fn current_height(&self) -> StateResult<u64> {
        self.state.lock().store.tip_height()
    }

    /// Whether the block was accepted or quarantined before.
    pub fn has_been_seen(&self, id: &BlockId) -> StateResult<bool> {
        let state = self.state.lock();
        Ok(state.store.has_processed_block(id)? || state.store.is_dos_block(id)?)
    }

    /// Stored diff set of a processed block, if present.
    pub fn diff_set(&self, id: &BlockId) -> StateResult<Option<DiffSet>> {
        Ok(self
            .state
            .lock()
            .store
            .processed_block(id)?
            .map(|pb| pb.diff_set))
    }

    /// Deterministic digest of the whole consensus state.
    pub fn consensus_checksum(&self) -> StateResult<silo_types::Hash256> {
        self.state.lock().store.consensus_checksum()
    }

    /// Register a subscriber for future consensus changes.
    pub fn consensus_change_subscribe(&self, subscriber: Arc<dyn ConsensusSubscriber>) {
        self.hub.subscribe(subscriber);
    }

    /// Drive the applier from a block source. The shutdown flag is honored
    /// between blocks; a commit in flight always completes or unwinds first.
    pub fn run(&self, source: &mut dyn BlockSource, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::SeqCst) {
            let Some(block) = source.next_block() else {
                break;
            };
            match self.accept_block(block) {
                Ok(report) => {
                    debug!(tip = %report.tip, height = report.height, "block accepted");
                }
                Err(StateError::Rejected(reason)) => {
                    warn!(reason = %reason, "block rejected");
                }
                Err(err) => {
                    error!(error = %err, "writer loop stopping");
                    break;
                }
            }
        }
    }
}

impl ConsensusState {
    /// Install the genesis block: path entry plus a synthetic apply-direction
    /// diff set creating the configured allocations.
    pub(crate) fn install_genesis(&mut self, config: &ChainConfig) -> StateResult<()> {
        let block = config.genesis_block();
        let mut pb = ProcessedBlock::new(block, 0);
        pb.diffs_generated = true;

        self.store.begin()?;
        self.store.push_path(&pb.id)?;

        for (index, output) in config.genesis_coin_allocations.iter().enumerate() {
            let diff = CoinOutputDiff {
                direction: DiffDirection::Apply,
                id: ChainConfig::genesis_coin_output_id(&pb.id, index as u64),
                output: output.clone(),
            };
            self.store
                .commit_coin_output_diff(&diff, DiffDirection::Apply)?;
            pb.diff_set.coin_output_diffs.push(diff);
        }

        for (index, output) in config.genesis_siafund_allocations.iter().enumerate() {
            let diff = SiafundOutputDiff {
                direction: DiffDirection::Apply,
                id: ChainConfig::genesis_siafund_output_id(&pb.id, index as u64),
                output: SiafundOutput {
                    claim_start: self.store.siafund_pool()?,
                    ..output.clone()
                },
            };
            self.store
                .commit_siafund_output_diff(&diff, DiffDirection::Apply)?;
            pb.diff_set.siafund_output_diffs.push(diff);
        }

        if self.record_checksums {
            pb.consensus_hash = Some(self.store.consensus_checksum()?);
        }
        self.store.put_processed_block(&pb)?;
        self.store.commit()?;

        info!(genesis = %pb.id, "genesis block installed");
        Ok(())
    }

    /// Admission and dispatch for one candidate block.
    fn accept(
        &mut self,
        block: Block,
    ) -> StateResult<(NewTipReport, Option<ConsensusChange>)> {
        let id = block.id();
        if self.store.has_processed_block(&id)? || self.store.is_dos_block(&id)? {
            return Err(BlockRejection::DuplicateBlock.into());
        }
        if self.store.is_dos_block(&block.parent_id)? {
            return Err(BlockRejection::QuarantinedParent.into());
        }
        let parent = self
            .store
            .processed_block(&block.parent_id)?
            .ok_or(BlockRejection::InvalidSuccessor)?;
        let height = parent.height + 1;
        let mut pb = ProcessedBlock::new(block, height);

        // The block enters the block map before application, so the fork
        // walker can see it and a failed application can delete it.
        self.store.begin()?;
        self.store.put_processed_block(&pb)?;
        self.store.commit()?;

        let tip = self.store.tip()?;
        if pb.parent_id == tip {
            self.generate_and_apply(&mut pb)?;
            let report = NewTipReport {
                tip: id,
                height,
                reverted: Vec::new(),
                applied: vec![id],
            };
            let change = self.build_change(&report)?;
            return Ok((report, Some(change)));
        }

        if height > self.store.tip_height()? {
            let (reverted, applied) = self.fork_blockchain(&pb)?;
            let report = NewTipReport {
                tip: self.store.tip()?,
                height: self.store.tip_height()?,
                reverted,
                applied,
            };
            let change = self.build_change(&report)?;
            return Ok((report, Some(change)));
        }

        debug!(block = %id, height, "sidechain block held without state effects");
        Ok((
            NewTipReport {
                tip,
                height: self.store.tip_height()?,
                reverted: Vec::new(),
                applied: Vec::new(),
            },
            None,
        ))
    }

    /// Assemble the subscriber notification for a committed report.
    fn build_change(&self, report: &NewTipReport) -> StateResult<ConsensusChange> {
        let mut summary = DiffSummary::default();
        for id in report.reverted.iter().chain(report.applied.iter()) {
            if let Some(pb) = self.store.processed_block(id)? {
                summary.add(&pb.diff_set);
            }
        }
        Ok(ConsensusChange {
            reverted_blocks: report.reverted.clone(),
            applied_blocks: report.applied.clone(),
            diff_summary: summary,
        })
    }
}
