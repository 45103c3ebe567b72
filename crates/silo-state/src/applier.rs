//! Block application.
//!
//! Diff generation and validation happen at the same time: transactions may
//! depend on each other within a block, so each one is validated against the
//! state left behind by its predecessors and applied immediately. If a
//! transaction fails partway through the block, the accumulated diffs are
//! committed in the revert direction and the block is quarantined.

use crate::diffs::{
    CoinOutputDiff, DelayedCoinOutputDiff, DiffDirection, FileContractDiff, SiafundOutputDiff,
    SiafundPoolDiff,
};
use crate::processed::ProcessedBlock;
use crate::set::ConsensusState;
use crate::{BlockRejection, StateError, StateResult};
use silo_consensus::{params, SpentOutputs, StateView, TxError, TxValidator};
use silo_types::{
    Block, BlockId, CoinOutput, CoinOutputId, Currency, FileContract, FileContractId,
    SiafundOutput, SiafundOutputId, Transaction,
};
use std::cell::RefCell;
use tracing::{info, instrument, warn};

/// Why diff generation stopped.
enum GenerateFailure {
    /// A transaction failed validation; state has been rewound and the block
    /// quarantined.
    Tx(TxError),
    /// A fatal error; the open transaction must be dropped.
    Fatal(StateError),
}

impl From<StateError> for GenerateFailure {
    fn from(err: StateError) -> Self {
        GenerateFailure::Fatal(err)
    }
}

/// State view over the store for the validator.
///
/// Lookups surface as `Option`; a storage failure is parked here and
/// re-raised as fatal once validation returns.
struct ApplyView<'a> {
    state: &'a ConsensusState,
    height: u64,
    fatal: RefCell<Option<StateError>>,
}

impl ApplyView<'_> {
    fn catch<T>(&self, result: StateResult<Option<T>>) -> Option<T> {
        match result {
            Ok(value) => value,
            Err(err) => {
                let mut fatal = self.fatal.borrow_mut();
                if fatal.is_none() {
                    *fatal = Some(err);
                }
                None
            }
        }
    }
}

impl StateView for ApplyView<'_> {
    fn coin_output(&self, id: &CoinOutputId) -> Option<CoinOutput> {
        self.catch(self.state.store.coin_output(id))
    }

    fn siafund_output(&self, id: &SiafundOutputId) -> Option<SiafundOutput> {
        self.catch(self.state.store.siafund_output(id))
    }

    fn file_contract(&self, id: &FileContractId) -> Option<FileContract> {
        self.catch(self.state.store.file_contract(id))
    }

    fn siafund_pool(&self) -> Currency {
        self.catch(self.state.store.siafund_pool().map(Some))
            .unwrap_or(Currency::ZERO)
    }

    fn block_height(&self) -> u64 {
        self.height
    }

    fn path_block_id(&self, height: u64) -> Option<BlockId> {
        self.catch(self.state.store.path_block_id(height))
    }
}

impl ConsensusState {
    /// Verify the block and integrate it into the consensus state.
    ///
    /// Preconditions: diffs not yet generated, and the block's parent is the
    /// current tip. On success the diffs are generated and persisted and the
    /// block becomes the tip. On a transaction error all partial diffs are
    /// reverted, the block id is quarantined, the block leaves the block map,
    /// and the error is returned as a rejection.
    #[instrument(skip(self, pb), fields(block = %pb.id, height = pb.height))]
    pub(crate) fn generate_and_apply(&mut self, pb: &mut ProcessedBlock) -> StateResult<()> {
        if pb.diffs_generated {
            return Err(StateError::corruption(
                "generating diffs for a block that already has them",
            ));
        }
        if pb.parent_id != self.store.tip()? {
            return Err(StateError::corruption(
                "generating diffs for a block that does not extend the tip",
            ));
        }

        self.store.begin()?;
        match self.generate(pb) {
            Ok(()) => {
                if self.record_checksums {
                    match self.store.consensus_checksum() {
                        Ok(checksum) => pb.consensus_hash = Some(checksum),
                        Err(err) => {
                            self.store.rollback();
                            return Err(err);
                        }
                    }
                }
                if let Err(err) = self.store.put_processed_block(pb) {
                    self.store.rollback();
                    return Err(err);
                }
                self.store.commit()?;
                info!(block = %pb.id, height = pb.height, "block applied");
                Ok(())
            }
            Err(GenerateFailure::Tx(err)) => {
                // The rewind and quarantine live in the same transaction, so
                // the state restore and the dos entry land atomically.
                self.store.commit()?;
                warn!(block = %pb.id, height = pb.height, error = %err, "block quarantined");
                Err(BlockRejection::InvalidTransaction(err).into())
            }
            Err(GenerateFailure::Fatal(err)) => {
                self.store.rollback();
                Err(err)
            }
        }
    }

    /// The generation body; runs inside the open transaction.
    fn generate(&mut self, pb: &mut ProcessedBlock) -> Result<(), GenerateFailure> {
        self.store.push_path(&pb.id)?;
        self.store
            .create_delayed_bucket(pb.height + self.maturity_delay)?;

        // From here on the accumulated diffs describe every change, so a
        // failure at any point can rewind by committing them in reverse.
        pb.diffs_generated = true;

        let transactions = pb.block.transactions.clone();
        let mut spent = SpentOutputs::new();
        for tx in &transactions {
            match self.validate_transaction(pb.height, tx, &spent)? {
                Ok(()) => {
                    self.apply_transaction(pb, tx)?;
                    spent.record(tx);
                }
                Err(tx_err) => {
                    // Matured outputs must be drained before the rewind so
                    // the bucket at this height can be recreated and refilled
                    // by the reverted delayed diffs.
                    self.apply_matured_outputs(pb)?;
                    self.commit_diff_set(pb, DiffDirection::Revert)?;
                    self.store.add_dos_block(&pb.id)?;
                    self.store.remove_processed_block(&pb.id)?;
                    return Err(GenerateFailure::Tx(tx_err));
                }
            }
        }

        self.apply_maintenance(pb)?;
        Ok(())
    }

    /// Validate one transaction against the current (partially applied)
    /// state, separating fatal storage errors from validation errors.
    fn validate_transaction(
        &self,
        height: u64,
        tx: &Transaction,
        spent: &SpentOutputs,
    ) -> StateResult<Result<(), TxError>> {
        let view = ApplyView {
            state: self,
            height,
            fatal: RefCell::new(None),
        };
        let result = TxValidator::new(&view, self.verifier.as_ref()).validate(tx, spent);
        if let Some(fatal) = view.fatal.into_inner() {
            return Err(fatal);
        }
        Ok(result)
    }

    /// Emit and commit the diffs for a validated transaction, appending each
    /// to the block's diff set in emit order.
    fn apply_transaction(
        &mut self,
        pb: &mut ProcessedBlock,
        tx: &Transaction,
    ) -> StateResult<()> {
        for input in &tx.coin_inputs {
            let output = self.store.coin_output(&input.parent_id)?.ok_or_else(|| {
                StateError::corruption("validated coin input vanished before application")
            })?;
            let diff = CoinOutputDiff {
                direction: DiffDirection::Revert,
                id: input.parent_id,
                output,
            };
            self.store
                .commit_coin_output_diff(&diff, DiffDirection::Apply)?;
            pb.diff_set.coin_output_diffs.push(diff);
        }

        for (index, output) in tx.coin_outputs.iter().enumerate() {
            let diff = CoinOutputDiff {
                direction: DiffDirection::Apply,
                id: tx.coin_output_id(index as u64),
                output: output.clone(),
            };
            self.store
                .commit_coin_output_diff(&diff, DiffDirection::Apply)?;
            pb.diff_set.coin_output_diffs.push(diff);
        }

        for (index, contract) in tx.file_contracts.iter().enumerate() {
            let diff = FileContractDiff {
                direction: DiffDirection::Apply,
                id: tx.file_contract_id(index as u64),
                contract: contract.clone(),
            };
            self.store
                .commit_file_contract_diff(&diff, DiffDirection::Apply)?;
            pb.diff_set.file_contract_diffs.push(diff);

            // The contract tax enters the pool at formation.
            let previous = self.store.siafund_pool()?;
            let adjusted = previous
                .checked_add(params::contract_tax(contract.payout))
                .ok_or_else(|| StateError::corruption("siafund pool overflow"))?;
            let pool_diff = SiafundPoolDiff {
                direction: DiffDirection::Apply,
                previous,
                adjusted,
            };
            self.store
                .commit_siafund_pool_diff(&pool_diff, DiffDirection::Apply)?;
            pb.diff_set.siafund_pool_diffs.push(pool_diff);
        }

        for revision in &tx.file_contract_revisions {
            let current = self
                .store
                .file_contract(&revision.parent_id)?
                .ok_or_else(|| {
                    StateError::corruption("validated revision target vanished before application")
                })?;
            let removal = FileContractDiff {
                direction: DiffDirection::Revert,
                id: revision.parent_id,
                contract: current.clone(),
            };
            self.store
                .commit_file_contract_diff(&removal, DiffDirection::Apply)?;
            pb.diff_set.file_contract_diffs.push(removal);

            let addition = FileContractDiff {
                direction: DiffDirection::Apply,
                id: revision.parent_id,
                contract: revision.revised_contract(&current),
            };
            self.store
                .commit_file_contract_diff(&addition, DiffDirection::Apply)?;
            pb.diff_set.file_contract_diffs.push(addition);
        }

        for proof in &tx.storage_proofs {
            let contract = self.store.file_contract(&proof.parent_id)?.ok_or_else(|| {
                StateError::corruption("validated proof target vanished before application")
            })?;
            for (index, output) in contract.valid_proof_outputs.iter().enumerate() {
                let diff = DelayedCoinOutputDiff {
                    direction: DiffDirection::Apply,
                    maturity_height: pb.height + self.maturity_delay,
                    id: proof.parent_id.proof_output_id(true, index as u64),
                    output: output.clone(),
                };
                self.store
                    .commit_delayed_coin_output_diff(&diff, DiffDirection::Apply)?;
                pb.diff_set.delayed_coin_output_diffs.push(diff);
            }
            let removal = FileContractDiff {
                direction: DiffDirection::Revert,
                id: proof.parent_id,
                contract,
            };
            self.store
                .commit_file_contract_diff(&removal, DiffDirection::Apply)?;
            pb.diff_set.file_contract_diffs.push(removal);
        }

        for input in &tx.siafund_inputs {
            let output = self
                .store
                .siafund_output(&input.parent_id)?
                .ok_or_else(|| {
                    StateError::corruption("validated siafund input vanished before application")
                })?;

            // The holder accrues the pool growth since the output was
            // created, pro rata by share count.
            let pool = self.store.siafund_pool()?;
            let accrued = pool.checked_sub(output.claim_start).ok_or_else(|| {
                StateError::corruption("siafund pool below an output's claim start")
            })?;
            let claim = accrued
                .checked_mul(output.count)
                .ok_or_else(|| StateError::corruption("siafund claim overflow"))?
                .div_floor(params::SIAFUND_COUNT);
            let claim_diff = DelayedCoinOutputDiff {
                direction: DiffDirection::Apply,
                maturity_height: pb.height + self.maturity_delay,
                id: input.parent_id.claim_output_id(),
                output: CoinOutput {
                    value: claim,
                    unlock_hash: input.claim_unlock_hash,
                },
            };
            self.store
                .commit_delayed_coin_output_diff(&claim_diff, DiffDirection::Apply)?;
            pb.diff_set.delayed_coin_output_diffs.push(claim_diff);

            let diff = SiafundOutputDiff {
                direction: DiffDirection::Revert,
                id: input.parent_id,
                output,
            };
            self.store
                .commit_siafund_output_diff(&diff, DiffDirection::Apply)?;
            pb.diff_set.siafund_output_diffs.push(diff);
        }

        for (index, output) in tx.siafund_outputs.iter().enumerate() {
            // claim_start is a consensus field, not a transaction field: it
            // snapshots the pool at creation regardless of the encoded value.
            let created = SiafundOutput {
                count: output.count,
                unlock_hash: output.unlock_hash,
                claim_start: self.store.siafund_pool()?,
            };
            let diff = SiafundOutputDiff {
                direction: DiffDirection::Apply,
                id: tx.siafund_output_id(index as u64),
                output: created,
            };
            self.store
                .commit_siafund_output_diff(&diff, DiffDirection::Apply)?;
            pb.diff_set.siafund_output_diffs.push(diff);
        }

        Ok(())
    }

    /// Apply or revert a block's recorded diff set.
    ///
    /// Category order is load-bearing: {coin, file contract, siafund,
    /// delayed coin, siafund pool} forward for `Apply`, the same lists
    /// reverse-iterated with the inverse operation for `Revert`. A stored
    /// diff set must replay identically across restarts and implementations.
    pub(crate) fn commit_diff_set(
        &mut self,
        pb: &ProcessedBlock,
        dir: DiffDirection,
    ) -> StateResult<()> {
        // Sanity: diffs must exist, and the diff set must attach to the
        // current tip (its parent when applying, itself when reverting).
        if !pb.diffs_generated {
            return Err(StateError::corruption(
                "committing a diff set before generating diffs",
            ));
        }
        let tip = self.store.tip()?;
        match dir {
            DiffDirection::Apply => {
                if tip != pb.parent_id {
                    return Err(StateError::corruption(
                        "applying a diff set that is not the tip's child",
                    ));
                }
            }
            DiffDirection::Revert => {
                if tip != pb.id {
                    return Err(StateError::corruption(
                        "reverting a diff set that is not the current tip",
                    ));
                }
            }
        }

        self.create_upcoming_bucket(pb, dir)?;
        self.commit_diffs(pb, dir)?;
        self.delete_obsolete_bucket(pb, dir)?;
        match dir {
            DiffDirection::Apply => self.store.push_path(&pb.id)?,
            DiffDirection::Revert => {
                self.store.pop_path()?;
            }
        }
        Ok(())
    }

    /// Create the bucket the delayed diffs are about to fill.
    fn create_upcoming_bucket(
        &mut self,
        pb: &ProcessedBlock,
        dir: DiffDirection,
    ) -> StateResult<()> {
        match dir {
            DiffDirection::Apply => self
                .store
                .create_delayed_bucket(pb.height + self.maturity_delay),
            DiffDirection::Revert => {
                // Heights at or below the maturity delay never had a bucket.
                if pb.height > self.maturity_delay {
                    self.store.create_delayed_bucket(pb.height)?;
                }
                Ok(())
            }
        }
    }

    fn commit_diffs(&mut self, pb: &ProcessedBlock, dir: DiffDirection) -> StateResult<()> {
        let set = &pb.diff_set;
        match dir {
            DiffDirection::Apply => {
                for diff in &set.coin_output_diffs {
                    self.store.commit_coin_output_diff(diff, dir)?;
                }
                for diff in &set.file_contract_diffs {
                    self.store.commit_file_contract_diff(diff, dir)?;
                }
                for diff in &set.siafund_output_diffs {
                    self.store.commit_siafund_output_diff(diff, dir)?;
                }
                for diff in &set.delayed_coin_output_diffs {
                    self.store.commit_delayed_coin_output_diff(diff, dir)?;
                }
                for diff in &set.siafund_pool_diffs {
                    self.store.commit_siafund_pool_diff(diff, dir)?;
                }
            }
            DiffDirection::Revert => {
                for diff in set.coin_output_diffs.iter().rev() {
                    self.store.commit_coin_output_diff(diff, dir)?;
                }
                for diff in set.file_contract_diffs.iter().rev() {
                    self.store.commit_file_contract_diff(diff, dir)?;
                }
                for diff in set.siafund_output_diffs.iter().rev() {
                    self.store.commit_siafund_output_diff(diff, dir)?;
                }
                for diff in set.delayed_coin_output_diffs.iter().rev() {
                    self.store.commit_delayed_coin_output_diff(diff, dir)?;
                }
                for diff in set.siafund_pool_diffs.iter().rev() {
                    self.store.commit_siafund_pool_diff(diff, dir)?;
                }
            }
        }
        Ok(())
    }

    /// Delete the bucket that has been drained (apply) or emptied by the
    /// rewind (revert). It must be empty.
    fn delete_obsolete_bucket(
        &mut self,
        pb: &ProcessedBlock,
        dir: DiffDirection,
    ) -> StateResult<()> {
        match dir {
            DiffDirection::Apply => {
                if pb.height > self.maturity_delay {
                    self.store.delete_delayed_bucket(pb.height)?;
                }
                Ok(())
            }
            DiffDirection::Revert => self
                .store
                .delete_delayed_bucket(pb.height + self.maturity_delay),
        }
    }
}

/// Payout id for a block whose id is already cached.
pub(crate) fn miner_payout_id(block_id: &BlockId, index: u64) -> CoinOutputId {
    Block::payout_id(block_id, index)
}
