//! Chain reorganization.
//!
//! A candidate block whose chain forks from the current path triggers a
//! reorg: walk back to the common ancestor, revert the current chain's diff
//! sets down to it, then apply the fork's blocks forward. If any forward
//! application fails, everything is unwound and the original chain restored
//! bit for bit.

use crate::diffs::DiffDirection;
use crate::processed::ProcessedBlock;
use crate::set::ConsensusState;
use crate::{StateError, StateResult};
use silo_types::BlockId;
use tracing::{info, instrument, warn};

impl ConsensusState {
    /// Blocks from the child of the common-path ancestor up to `pb`,
    /// ascending by height.
    fn backtrack_to_path(&self, pb: &ProcessedBlock) -> StateResult<Vec<ProcessedBlock>> {
        let mut chain = vec![pb.clone()];
        let mut current = pb.clone();
        // Walk parent ids (the block map owns the blocks; no pointers) until
        // a parent lies on the current path.
        while self.store.path_block_id(current.height - 1)? != Some(current.parent_id) {
            current = self
                .store
                .processed_block(&current.parent_id)?
                .ok_or_else(|| {
                    StateError::corruption(format!(
                        "fork block has no parent in the block map: {}",
                        current.parent_id
                    ))
                })?;
            chain.push(current.clone());
        }
        chain.reverse();
        Ok(chain)
    }

    /// Revert tip blocks until `target` is the tip. Returns the reverted
    /// blocks, newest first. Each block reverts in its own transaction.
    fn revert_to_block(&mut self, target: &BlockId) -> StateResult<Vec<ProcessedBlock>> {
        let mut reverted = Vec::new();
        while self.store.tip()? != *target {
            let tip = self.store.tip()?;
            let pb = self.store.processed_block(&tip)?.ok_or_else(|| {
                StateError::corruption(format!("tip block missing from the block map: {tip}"))
            })?;
            self.commit_diff_set_tx(&pb, DiffDirection::Revert)?;
            reverted.push(pb);
        }
        Ok(reverted)
    }

    /// Commit one block's diff set inside its own transaction.
    fn commit_diff_set_tx(&mut self, pb: &ProcessedBlock, dir: DiffDirection) -> StateResult<()> {
        self.store.begin()?;
        match self.commit_diff_set(pb, dir) {
            Ok(()) => self.store.commit(),
            Err(err) => {
                self.store.rollback();
                Err(err)
            }
        }
    }

    /// Apply one fork block: replay its stored diff set if it has one,
    /// otherwise generate diffs (validating it for the first time).
    fn apply_fork_block(&mut self, mut pb: ProcessedBlock) -> StateResult<ProcessedBlock> {
        if pb.diffs_generated {
            self.commit_diff_set_tx(&pb, DiffDirection::Apply)?;
        } else {
            self.generate_and_apply(&mut pb)?;
        }
        Ok(pb)
    }

    /// Reorganize the chain so that `new_tip` becomes the tip.
    ///
    /// Returns the reverted and applied block ids, both in the order they
    /// were processed. On a block rejection during the forward phase the
    /// whole reorg is unwound and the pre-reorg state restored exactly;
    /// corruption errors skip recovery.
    #[instrument(skip(self, new_tip), fields(new_tip = %new_tip.id, height = new_tip.height))]
    pub(crate) fn fork_blockchain(
        &mut self,
        new_tip: &ProcessedBlock,
    ) -> StateResult<(Vec<BlockId>, Vec<BlockId>)> {
        let apply_chain = self.backtrack_to_path(new_tip)?;
        let ancestor = apply_chain[0].parent_id;
        let reverted = self.revert_to_block(&ancestor)?;

        let mut applied: Vec<ProcessedBlock> = Vec::new();
        for pb in &apply_chain {
            match self.apply_fork_block(pb.clone()) {
                Ok(applied_pb) => applied.push(applied_pb),
                Err(err) => {
                    if !matches!(err, StateError::Rejected(_)) {
                        return Err(err);
                    }
                    warn!(failed = %pb.id, error = %err, "reorg failed, unwinding");
                    self.unwind(&applied, &reverted)?;
                    return Err(err);
                }
            }
        }

        info!(
            reverted = reverted.len(),
            applied = applied.len(),
            new_tip = %new_tip.id,
            "chain reorganized"
        );
        Ok((
            reverted.iter().map(|pb| pb.id).collect(),
            applied.iter().map(|pb| pb.id).collect(),
        ))
    }

    /// Undo a partial reorg: revert the fork blocks applied so far, then
    /// re-apply the originally reverted blocks (oldest first).
    fn unwind(
        &mut self,
        applied: &[ProcessedBlock],
        reverted: &[ProcessedBlock],
    ) -> StateResult<()> {
        for pb in applied.iter().rev() {
            self.commit_diff_set_tx(pb, DiffDirection::Revert)?;
        }
        for pb in reverted.iter().rev() {
            self.commit_diff_set_tx(pb, DiffDirection::Apply)?;
        }
        Ok(())
    }
}
