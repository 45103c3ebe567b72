//! Transaction validation.
//!
//! A transaction is validated against the *current* state, which may already
//! include effects of earlier transactions from the same block. The applier
//! threads a [`SpentOutputs`] set through the block so a second spend of an
//! output consumed earlier in the block reports `DoubleSpend` rather than
//! `UnknownInput`.

use crate::{params, payout_sum, StateView, TxError};
use silo_types::{
    CoinOutputId, Currency, FileContractId, Hash256, SiafundOutputId, Signature, Transaction,
    UnlockConditions, UnlockHash,
};
use std::collections::HashSet;
use tracing::debug;

/// Signature verification seam.
///
/// The crypto collaborator checks that the revealed signatures satisfy the
/// unlock conditions over the transaction's signature hash. The engine has
/// already checked the hash binding and the timelock.
pub trait UnlockVerifier {
    fn verify_unlock(
        &self,
        conditions: &UnlockConditions,
        signatures: &[Signature],
        sig_hash: &Hash256,
    ) -> bool;
}

/// Outputs spent so far along the block under application.
#[derive(Debug, Default)]
pub struct SpentOutputs {
    coins: HashSet<CoinOutputId>,
    funds: HashSet<SiafundOutputId>,
}

impl SpentOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transaction's spends after it was validated and applied.
    pub fn record(&mut self, tx: &Transaction) {
        for input in &tx.coin_inputs {
            self.coins.insert(input.parent_id);
        }
        for input in &tx.siafund_inputs {
            self.funds.insert(input.parent_id);
        }
    }
}

/// Validates single transactions against a state view.
pub struct TxValidator<'a> {
    view: &'a dyn StateView,
    verifier: &'a dyn UnlockVerifier,
}

impl<'a> TxValidator<'a> {
    pub fn new(view: &'a dyn StateView, verifier: &'a dyn UnlockVerifier) -> Self {
        Self { view, verifier }
    }

    /// Validate `tx` against the current state.
    ///
    /// On success the transaction can be applied as-is; any error invalidates
    /// the whole block.
    pub fn validate(&self, tx: &Transaction, spent: &SpentOutputs) -> Result<(), TxError> {
        let sig_hash = tx.sig_hash();
        let height = self.view.block_height();

        let inflow = self.check_coin_inputs(tx, spent, &sig_hash, height)?;
        self.check_coin_balance(tx, inflow)?;
        self.check_file_contracts(tx, height)?;
        self.check_revisions(tx, &sig_hash, height)?;
        self.check_storage_proofs(tx, height)?;
        self.check_siafunds(tx, spent, &sig_hash, height)?;

        debug!(tx_id = %tx.id(), "transaction valid");
        Ok(())
    }

    fn check_unlock(
        &self,
        conditions: &UnlockConditions,
        signatures: &[Signature],
        expected: &UnlockHash,
        sig_hash: &Hash256,
        height: u64,
        subject: &dyn std::fmt::Display,
    ) -> Result<(), TxError> {
        if conditions.unlock_hash() != *expected {
            return Err(TxError::InvalidUnlock(subject.to_string()));
        }
        if conditions.timelock > height {
            return Err(TxError::InvalidUnlock(subject.to_string()));
        }
        if !self.verifier.verify_unlock(conditions, signatures, sig_hash) {
            return Err(TxError::InvalidUnlock(subject.to_string()));
        }
        Ok(())
    }

    fn check_coin_inputs(
        &self,
        tx: &Transaction,
        spent: &SpentOutputs,
        sig_hash: &Hash256,
        height: u64,
    ) -> Result<Currency, TxError> {
        let mut inflow = Currency::ZERO;
        let mut seen = HashSet::new();
        for input in &tx.coin_inputs {
            if spent.coins.contains(&input.parent_id) || !seen.insert(input.parent_id) {
                return Err(TxError::DoubleSpend(input.parent_id.to_string()));
            }
            let output = self
                .view
                .coin_output(&input.parent_id)
                .ok_or_else(|| TxError::UnknownInput(input.parent_id.to_string()))?;
            self.check_unlock(
                &input.unlock_conditions,
                &input.signatures,
                &output.unlock_hash,
                sig_hash,
                height,
                &input.parent_id,
            )?;
            inflow = inflow
                .checked_add(output.value)
                .ok_or(TxError::ValueMismatch {
                    inflow,
                    outflow: Currency::ZERO,
                })?;
        }
        Ok(inflow)
    }

    fn check_coin_balance(&self, tx: &Transaction, inflow: Currency) -> Result<(), TxError> {
        let mut outflow = Currency::ZERO;
        let overflow = |outflow| TxError::ValueMismatch { inflow, outflow };
        for output in &tx.coin_outputs {
            outflow = outflow
                .checked_add(output.value)
                .ok_or_else(|| overflow(outflow))?;
        }
        for fee in &tx.miner_fees {
            outflow = outflow.checked_add(*fee).ok_or_else(|| overflow(outflow))?;
        }
        for contract in &tx.file_contracts {
            outflow = outflow
                .checked_add(contract.payout)
                .ok_or_else(|| overflow(outflow))?;
        }
        if inflow != outflow {
            return Err(TxError::ValueMismatch { inflow, outflow });
        }
        Ok(())
    }

    fn check_file_contracts(&self, tx: &Transaction, height: u64) -> Result<(), TxError> {
        for contract in &tx.file_contracts {
            if contract.window_start <= height {
                return Err(TxError::InvalidContract("window must start in the future"));
            }
            if contract.window_end <= contract.window_start {
                return Err(TxError::InvalidContract("window must end after it starts"));
            }
            let tax = params::contract_tax(contract.payout);
            let after_tax = contract
                .payout
                .checked_sub(tax)
                .ok_or(TxError::InvalidContract("payout smaller than tax"))?;
            let valid = payout_sum(&contract.valid_proof_outputs)
                .ok_or(TxError::InvalidContract("valid payout overflow"))?;
            let missed = payout_sum(&contract.missed_proof_outputs)
                .ok_or(TxError::InvalidContract("missed payout overflow"))?;
            if valid != after_tax || missed != after_tax {
                return Err(TxError::InvalidContract(
                    "payout alternatives must sum to payout minus tax",
                ));
            }
        }
        Ok(())
    }

    fn check_revisions(
        &self,
        tx: &Transaction,
        sig_hash: &Hash256,
        height: u64,
    ) -> Result<(), TxError> {
        for revision in &tx.file_contract_revisions {
            let id = revision.parent_id;
            let contract = self
                .view
                .file_contract(&id)
                .ok_or_else(|| TxError::UnknownInput(id.to_string()))?;
            self.check_unlock(
                &revision.unlock_conditions,
                &revision.signatures,
                &contract.unlock_hash,
                sig_hash,
                height,
                &id,
            )?;
            if height >= contract.window_start {
                return Err(TxError::InvalidRevision {
                    id: id.to_string(),
                    reason: "proof window already open",
                });
            }
            if revision.new_revision_number <= contract.revision_number {
                return Err(TxError::InvalidRevision {
                    id: id.to_string(),
                    reason: "revision number must increase",
                });
            }
            if revision.new_window_start <= height
                || revision.new_window_end <= revision.new_window_start
            {
                return Err(TxError::InvalidRevision {
                    id: id.to_string(),
                    reason: "revised window is not in the future",
                });
            }
            let after_tax = contract
                .payout
                .checked_sub(params::contract_tax(contract.payout))
                .ok_or(TxError::InvalidRevision {
                    id: id.to_string(),
                    reason: "payout smaller than tax",
                })?;
            let valid = payout_sum(&revision.new_valid_proof_outputs);
            let missed = payout_sum(&revision.new_missed_proof_outputs);
            if valid != Some(after_tax) || missed != Some(after_tax) {
                return Err(TxError::InvalidRevision {
                    id: id.to_string(),
                    reason: "revised payouts leave the original bounds",
                });
            }
        }
        Ok(())
    }

    fn check_storage_proofs(&self, tx: &Transaction, height: u64) -> Result<(), TxError> {
        let mut proven: HashSet<FileContractId> = HashSet::new();
        for proof in &tx.storage_proofs {
            let id = proof.parent_id;
            if !proven.insert(id) {
                return Err(TxError::DoubleSpend(id.to_string()));
            }
            let contract = self
                .view
                .file_contract(&id)
                .ok_or_else(|| TxError::UnknownInput(id.to_string()))?;
            if height < contract.window_start || height >= contract.window_end {
                return Err(TxError::LateProof {
                    id: id.to_string(),
                    window_start: contract.window_start,
                    window_end: contract.window_end,
                    height,
                });
            }
            let seed = self
                .view
                .path_block_id(contract.window_start)
                .ok_or_else(|| TxError::InvalidStorageProof(id.to_string()))?;
            let count = contract.segment_count();
            let index = crate::segment_index(&seed, &id, count);
            if !crate::verify_segment(
                &contract.file_merkle_root,
                &proof.segment,
                index,
                count,
                &proof.hash_set,
            ) {
                return Err(TxError::InvalidStorageProof(id.to_string()));
            }
        }
        Ok(())
    }

    fn check_siafunds(
        &self,
        tx: &Transaction,
        spent: &SpentOutputs,
        sig_hash: &Hash256,
        height: u64,
    ) -> Result<(), TxError> {
        let mut inflow = 0u64;
        let mut seen = HashSet::new();
        for input in &tx.siafund_inputs {
            if spent.funds.contains(&input.parent_id) || !seen.insert(input.parent_id) {
                return Err(TxError::DoubleSpend(input.parent_id.to_string()));
            }
            let output = self
                .view
                .siafund_output(&input.parent_id)
                .ok_or_else(|| TxError::UnknownInput(input.parent_id.to_string()))?;
            self.check_unlock(
                &input.unlock_conditions,
                &input.signatures,
                &output.unlock_hash,
                sig_hash,
                height,
                &input.parent_id,
            )?;
            inflow = inflow
                .checked_add(output.count)
                .ok_or(TxError::ValueMismatch {
                    inflow: Currency::from(inflow),
                    outflow: Currency::ZERO,
                })?;
        }

        let mut outflow = 0u64;
        for output in &tx.siafund_outputs {
            outflow = outflow
                .checked_add(output.count)
                .ok_or(TxError::ValueMismatch {
                    inflow: Currency::from(inflow),
                    outflow: Currency::from(outflow),
                })?;
        }
        if inflow != outflow {
            return Err(TxError::ValueMismatch {
                inflow: Currency::from(inflow),
                outflow: Currency::from(outflow),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_types::{BlockId, CoinInput, CoinOutput, FileContract, SiafundOutput};
    use std::collections::HashMap;

    /// Accepts any signatures; tests exercise the structural checks.
    struct AlwaysValid;

    impl UnlockVerifier for AlwaysValid {
        fn verify_unlock(&self, _: &UnlockConditions, _: &[Signature], _: &Hash256) -> bool {
            true
        }
    }

    /// Rejects everything; used to hit the InvalidUnlock path.
    struct AlwaysInvalid;

    impl UnlockVerifier for AlwaysInvalid {
        fn verify_unlock(&self, _: &UnlockConditions, _: &[Signature], _: &Hash256) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct MapView {
        coins: HashMap<CoinOutputId, CoinOutput>,
        funds: HashMap<SiafundOutputId, SiafundOutput>,
        contracts: HashMap<FileContractId, FileContract>,
        pool: Currency,
        height: u64,
    }

    impl StateView for MapView {
        fn coin_output(&self, id: &CoinOutputId) -> Option<CoinOutput> {
            self.coins.get(id).cloned()
        }
        fn siafund_output(&self, id: &SiafundOutputId) -> Option<SiafundOutput> {
            self.funds.get(id).cloned()
        }
        fn file_contract(&self, id: &FileContractId) -> Option<FileContract> {
            self.contracts.get(id).cloned()
        }
        fn siafund_pool(&self) -> Currency {
            self.pool
        }
        fn block_height(&self) -> u64 {
            self.height
        }
        fn path_block_id(&self, height: u64) -> Option<BlockId> {
            let mut bytes = [0u8; 32];
            bytes[..8].copy_from_slice(&height.to_be_bytes());
            Some(BlockId::from_bytes(bytes))
        }
    }

    fn conditions() -> UnlockConditions {
        UnlockConditions {
            timelock: 0,
            public_keys: vec![vec![1]],
            signatures_required: 1,
        }
    }

    fn funded_view(value: u64) -> (MapView, CoinOutputId) {
        let id = CoinOutputId::from_bytes([1; 32]);
        let mut view = MapView {
            height: 5,
            ..Default::default()
        };
        view.coins.insert(
            id,
            CoinOutput {
                value: Currency::from(value),
                unlock_hash: conditions().unlock_hash(),
            },
        );
        (view, id)
    }

    fn spend_tx(id: CoinOutputId, value: u64) -> Transaction {
        Transaction {
            coin_inputs: vec![CoinInput {
                parent_id: id,
                unlock_conditions: conditions(),
                signatures: vec![vec![0]],
            }],
            coin_outputs: vec![CoinOutput {
                value: Currency::from(value),
                unlock_hash: UnlockHash::from_bytes([7; 32]),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn valid_spend_passes() {
        let (view, id) = funded_view(100);
        let validator = TxValidator::new(&view, &AlwaysValid);
        let tx = spend_tx(id, 100);
        assert_eq!(validator.validate(&tx, &SpentOutputs::new()), Ok(()));
    }

    #[test]
    fn unknown_input_is_reported() {
        let view = MapView::default();
        let validator = TxValidator::new(&view, &AlwaysValid);
        let tx = spend_tx(CoinOutputId::from_bytes([9; 32]), 100);
        assert!(matches!(
            validator.validate(&tx, &SpentOutputs::new()),
            Err(TxError::UnknownInput(_))
        ));
    }

    #[test]
    fn spent_set_turns_missing_into_double_spend() {
        let (view, id) = funded_view(100);
        let validator = TxValidator::new(&view, &AlwaysValid);
        let tx = spend_tx(id, 100);
        let mut spent = SpentOutputs::new();
        spent.record(&tx);
        assert!(matches!(
            validator.validate(&tx, &spent),
            Err(TxError::DoubleSpend(_))
        ));
    }

    #[test]
    fn repeated_input_within_tx_is_double_spend() {
        let (view, id) = funded_view(100);
        let validator = TxValidator::new(&view, &AlwaysValid);
        let mut tx = spend_tx(id, 200);
        tx.coin_inputs.push(tx.coin_inputs[0].clone());
        assert!(matches!(
            validator.validate(&tx, &SpentOutputs::new()),
            Err(TxError::DoubleSpend(_))
        ));
    }

    #[test]
    fn imbalance_is_value_mismatch() {
        let (view, id) = funded_view(100);
        let validator = TxValidator::new(&view, &AlwaysValid);
        let tx = spend_tx(id, 99);
        assert!(matches!(
            validator.validate(&tx, &SpentOutputs::new()),
            Err(TxError::ValueMismatch { .. })
        ));
    }

    #[test]
    fn failed_signatures_are_invalid_unlock() {
        let (view, id) = funded_view(100);
        let validator = TxValidator::new(&view, &AlwaysInvalid);
        let tx = spend_tx(id, 100);
        assert!(matches!(
            validator.validate(&tx, &SpentOutputs::new()),
            Err(TxError::InvalidUnlock(_))
        ));
    }

    #[test]
    fn timelocked_output_cannot_be_spent_early() {
        let id = CoinOutputId::from_bytes([1; 32]);
        let locked = UnlockConditions {
            timelock: 50,
            ..conditions()
        };
        let mut view = MapView {
            height: 5,
            ..Default::default()
        };
        view.coins.insert(
            id,
            CoinOutput {
                value: Currency::from(100u64),
                unlock_hash: locked.unlock_hash(),
            },
        );
        let validator = TxValidator::new(&view, &AlwaysValid);
        let mut tx = spend_tx(id, 100);
        tx.coin_inputs[0].unlock_conditions = locked;
        assert!(matches!(
            validator.validate(&tx, &SpentOutputs::new()),
            Err(TxError::InvalidUnlock(_))
        ));
    }

    #[test]
    fn contract_window_must_be_future() {
        let (view, id) = funded_view(1000);
        let validator = TxValidator::new(&view, &AlwaysValid);
        let mut tx = spend_tx(id, 0);
        tx.coin_outputs.clear();
        tx.file_contracts.push(FileContract {
            file_size: 64,
            file_merkle_root: Hash256([0; 32]),
            window_start: 5,
            window_end: 10,
            payout: Currency::from(1000u64),
            valid_proof_outputs: vec![],
            missed_proof_outputs: vec![],
            unlock_hash: UnlockHash::default(),
            revision_number: 0,
        });
        assert_eq!(
            validator.validate(&tx, &SpentOutputs::new()),
            Err(TxError::InvalidContract("window must start in the future"))
        );
    }

    #[test]
    fn siafund_counts_must_balance() {
        let mut view = MapView {
            height: 5,
            ..Default::default()
        };
        let id = SiafundOutputId::from_bytes([4; 32]);
        view.funds.insert(
            id,
            SiafundOutput {
                count: 10,
                unlock_hash: conditions().unlock_hash(),
                claim_start: Currency::ZERO,
            },
        );
        let validator = TxValidator::new(&view, &AlwaysValid);
        let tx = Transaction {
            siafund_inputs: vec![silo_types::SiafundInput {
                parent_id: id,
                unlock_conditions: conditions(),
                signatures: vec![],
                claim_unlock_hash: UnlockHash::default(),
            }],
            siafund_outputs: vec![SiafundOutput {
                count: 9,
                unlock_hash: UnlockHash::default(),
                claim_start: Currency::ZERO,
            }],
            ..Default::default()
        };
        assert!(matches!(
            validator.validate(&tx, &SpentOutputs::new()),
            Err(TxError::ValueMismatch { .. })
        ));
    }
}
