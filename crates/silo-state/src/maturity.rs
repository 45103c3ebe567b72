//! Per-block maintenance.
//!
//! Runs once after a block's transactions: matured delayed outputs become
//! spendable, contracts expiring at this height without a proof pay their
//! missed alternative, and the block's miner payouts enter the delayed table.

use crate::applier::miner_payout_id;
use crate::diffs::{CoinOutputDiff, DelayedCoinOutputDiff, DiffDirection, FileContractDiff};
use crate::processed::ProcessedBlock;
use crate::set::ConsensusState;
use crate::{StateError, StateResult};
use tracing::debug;

impl ConsensusState {
    /// Apply all maintenance for the block, in fixed order.
    pub(crate) fn apply_maintenance(&mut self, pb: &mut ProcessedBlock) -> StateResult<()> {
        self.apply_matured_outputs(pb)?;
        self.apply_contract_maintenance(pb)?;
        self.apply_miner_payouts(pb)
    }

    /// Promote every delayed output maturing at this height into the
    /// spendable table and delete the emptied bucket.
    ///
    /// The first `maturity_delay` blocks have nothing to mature; no bucket
    /// exists at their height.
    pub(crate) fn apply_matured_outputs(&mut self, pb: &mut ProcessedBlock) -> StateResult<()> {
        if pb.height <= self.maturity_delay {
            return Ok(());
        }

        let matured = self.store.delayed_bucket_entries(pb.height)?;
        for (id, output) in matured {
            let removal = DelayedCoinOutputDiff {
                direction: DiffDirection::Revert,
                maturity_height: pb.height,
                id,
                output: output.clone(),
            };
            self.store
                .commit_delayed_coin_output_diff(&removal, DiffDirection::Apply)?;
            pb.diff_set.delayed_coin_output_diffs.push(removal);

            let promotion = CoinOutputDiff {
                direction: DiffDirection::Apply,
                id,
                output,
            };
            self.store
                .commit_coin_output_diff(&promotion, DiffDirection::Apply)?;
            pb.diff_set.coin_output_diffs.push(promotion);
        }

        self.store.delete_delayed_bucket(pb.height)
    }

    /// Sweep contracts whose window ends at this height: no proof arrived,
    /// so the missed alternative pays out (delayed) and the contract closes.
    fn apply_contract_maintenance(&mut self, pb: &mut ProcessedBlock) -> StateResult<()> {
        let expiring = self.store.expiring_contracts(pb.height)?;
        for id in expiring {
            let contract = self.store.file_contract(&id)?.ok_or_else(|| {
                StateError::corruption(format!(
                    "expiration index points at a missing contract: {id}"
                ))
            })?;
            for (index, output) in contract.missed_proof_outputs.iter().enumerate() {
                let diff = DelayedCoinOutputDiff {
                    direction: DiffDirection::Apply,
                    maturity_height: pb.height + self.maturity_delay,
                    id: id.proof_output_id(false, index as u64),
                    output: output.clone(),
                };
                self.store
                    .commit_delayed_coin_output_diff(&diff, DiffDirection::Apply)?;
                pb.diff_set.delayed_coin_output_diffs.push(diff);
            }
            debug!(contract = %id, height = pb.height, "contract expired unproven");
            let removal = FileContractDiff {
                direction: DiffDirection::Revert,
                id,
                contract,
            };
            self.store
                .commit_file_contract_diff(&removal, DiffDirection::Apply)?;
            pb.diff_set.file_contract_diffs.push(removal);
        }
        Ok(())
    }

    /// Miner payouts become delayed outputs maturing after the delay.
    fn apply_miner_payouts(&mut self, pb: &mut ProcessedBlock) -> StateResult<()> {
        for index in 0..pb.block.miner_payouts.len() {
            let diff = DelayedCoinOutputDiff {
                direction: DiffDirection::Apply,
                maturity_height: pb.height + self.maturity_delay,
                id: miner_payout_id(&pb.id, index as u64),
                output: pb.block.miner_payouts[index].clone(),
            };
            self.store
                .commit_delayed_coin_output_diff(&diff, DiffDirection::Apply)?;
            pb.diff_set.delayed_coin_output_diffs.push(diff);
        }
        Ok(())
    }
}
