//! File contract lifecycle: formation, revision, proofs, expiry, claims.

use crate::generators::{contract_tx, proof_tx, spend_tx, test_contract, test_segments};
use crate::harness::{test_unlock_conditions, test_unlock_hash, ChainHarness, TEST_MATURITY_DELAY};
use silo_consensus::params::SIAFUND_COUNT;
use silo_consensus::TxError;
use silo_state::{BlockRejection, StateError};
use silo_types::{
    Currency, FileContractRevision, SiafundInput, SiafundOutput, Transaction,
};

#[test]
fn contract_formation_taxes_the_pool() {
    let harness = ChainHarness::with_allocations(&[1000]);
    let segments = test_segments(4);
    let tx = contract_tx(
        harness.genesis_coin_id(0),
        test_contract(1000, 2, 4, &segments),
    );
    let contract_id = tx.file_contract_id(0);

    harness.extend(1, &[], vec![tx]).unwrap();

    assert!(harness.has_file_contract(&contract_id));
    assert_eq!(harness.expiring_contracts(4), vec![contract_id]);
    // 4% of the payout entered the pool.
    assert_eq!(harness.siafund_pool(), Currency::from(40u64));
}

#[test]
fn expiring_contract_pays_the_missed_alternative() {
    let harness = ChainHarness::with_allocations(&[1000]);
    let segments = test_segments(4);
    let tx = contract_tx(
        harness.genesis_coin_id(0),
        test_contract(1000, 2, 4, &segments),
    );
    let contract_id = tx.file_contract_id(0);
    harness.extend(1, &[], vec![tx]).unwrap();

    // Advance to the window end without a proof.
    harness.extend_empty(3);
    assert_eq!(harness.height(), 4);

    // Contract deleted, expiration index cleared, missed payout delayed.
    assert!(!harness.has_file_contract(&contract_id));
    assert!(harness.expiring_contracts(4).is_empty());
    let delayed = harness.delayed_outputs(4 + TEST_MATURITY_DELAY);
    assert_eq!(delayed.len(), 1);
    assert_eq!(delayed[0].0, contract_id.proof_output_id(false, 0));
    assert_eq!(delayed[0].1.value, Currency::from(960u64));
}

#[test]
fn valid_storage_proof_pays_the_valid_alternative() {
    let harness = ChainHarness::with_allocations(&[1000]);
    let segments = test_segments(4);
    let contract = test_contract(1000, 2, 5, &segments);
    let tx = contract_tx(harness.genesis_coin_id(0), contract.clone());
    let contract_id = tx.file_contract_id(0);
    harness.extend(1, &[], vec![tx]).unwrap();

    // Height 2 opens the window; its block seeds the challenge.
    let b2 = harness.extend(2, &[], Vec::new()).unwrap().tip;

    let proof = proof_tx(contract_id, &contract, &segments, &b2);
    harness.extend(3, &[], vec![proof]).unwrap();

    // Contract resolved: valid payout delayed, expiry entry gone.
    assert!(!harness.has_file_contract(&contract_id));
    assert!(harness.expiring_contracts(5).is_empty());
    let delayed = harness.delayed_outputs(3 + TEST_MATURITY_DELAY);
    assert_eq!(delayed.len(), 1);
    assert_eq!(delayed[0].0, contract_id.proof_output_id(true, 0));
    assert_eq!(delayed[0].1.value, Currency::from(960u64));

    // Nothing further happens at the old window end.
    harness.extend_empty(2);
    assert_eq!(harness.height(), 5);
    let payout_id = contract_id.proof_output_id(true, 0);
    harness.extend_empty(1);
    assert_eq!(
        harness.coin_output(&payout_id).map(|o| o.value),
        Some(Currency::from(960u64))
    );
}

#[test]
fn proof_outside_the_window_is_late() {
    let harness = ChainHarness::with_allocations(&[1000]);
    let segments = test_segments(4);
    let contract = test_contract(1000, 3, 5, &segments);
    let tx = contract_tx(harness.genesis_coin_id(0), contract.clone());
    let contract_id = tx.file_contract_id(0);
    harness.extend(1, &[], vec![tx]).unwrap();

    // Submitted at height 2, one block before the window opens.
    let seed = harness.tip();
    let early = proof_tx(contract_id, &contract, &segments, &seed);
    let block = harness.block(harness.tip(), 9, &[], vec![early]);
    let err = harness.set.accept_block(block).unwrap_err();
    assert!(matches!(
        err,
        StateError::Rejected(BlockRejection::InvalidTransaction(TxError::LateProof { .. }))
    ));
}

#[test]
fn tampered_proof_is_rejected() {
    let harness = ChainHarness::with_allocations(&[1000]);
    let segments = test_segments(4);
    let contract = test_contract(1000, 2, 5, &segments);
    let tx = contract_tx(harness.genesis_coin_id(0), contract.clone());
    let contract_id = tx.file_contract_id(0);
    harness.extend(1, &[], vec![tx]).unwrap();
    let b2 = harness.extend(2, &[], Vec::new()).unwrap().tip;

    let mut proof = proof_tx(contract_id, &contract, &segments, &b2);
    proof.storage_proofs[0].segment[0] ^= 1;
    let block = harness.block(harness.tip(), 9, &[], vec![proof]);
    let err = harness.set.accept_block(block).unwrap_err();
    assert!(matches!(
        err,
        StateError::Rejected(BlockRejection::InvalidTransaction(
            TxError::InvalidStorageProof(_)
        ))
    ));
}

#[test]
fn revision_replaces_the_contract_and_moves_its_expiry() {
    let harness = ChainHarness::with_allocations(&[1000]);
    let segments = test_segments(4);
    let contract = test_contract(1000, 3, 5, &segments);
    let tx = contract_tx(harness.genesis_coin_id(0), contract.clone());
    let contract_id = tx.file_contract_id(0);
    harness.extend(1, &[], vec![tx]).unwrap();

    let revision = Transaction {
        file_contract_revisions: vec![FileContractRevision {
            parent_id: contract_id,
            unlock_conditions: test_unlock_conditions(),
            signatures: vec![vec![2]],
            new_revision_number: 1,
            new_file_size: contract.file_size,
            new_file_merkle_root: contract.file_merkle_root,
            new_window_start: 4,
            new_window_end: 6,
            new_valid_proof_outputs: contract.valid_proof_outputs.clone(),
            new_missed_proof_outputs: contract.missed_proof_outputs.clone(),
            new_unlock_hash: contract.unlock_hash,
        }],
        ..Default::default()
    };
    harness.extend(2, &[], vec![revision]).unwrap();

    assert!(harness.expiring_contracts(5).is_empty());
    assert_eq!(harness.expiring_contracts(6), vec![contract_id]);
}

#[test]
fn stale_revision_number_is_rejected() {
    let harness = ChainHarness::with_allocations(&[1000]);
    let segments = test_segments(4);
    let contract = test_contract(1000, 3, 5, &segments);
    let tx = contract_tx(harness.genesis_coin_id(0), contract.clone());
    let contract_id = tx.file_contract_id(0);
    harness.extend(1, &[], vec![tx]).unwrap();
    let before = harness.checksum();

    let stale = Transaction {
        file_contract_revisions: vec![FileContractRevision {
            parent_id: contract_id,
            unlock_conditions: test_unlock_conditions(),
            signatures: vec![vec![2]],
            new_revision_number: 0,
            new_file_size: contract.file_size,
            new_file_merkle_root: contract.file_merkle_root,
            new_window_start: 4,
            new_window_end: 6,
            new_valid_proof_outputs: contract.valid_proof_outputs.clone(),
            new_missed_proof_outputs: contract.missed_proof_outputs.clone(),
            new_unlock_hash: contract.unlock_hash,
        }],
        ..Default::default()
    };
    let block = harness.block(harness.tip(), 9, &[], vec![stale]);
    let err = harness.set.accept_block(block).unwrap_err();
    assert!(matches!(
        err,
        StateError::Rejected(BlockRejection::InvalidTransaction(
            TxError::InvalidRevision { .. }
        ))
    ));
    // The rewind restored the state exactly.
    assert_eq!(harness.checksum(), before);
}

#[test]
fn siafund_spend_claims_the_pool_growth() {
    let harness = ChainHarness::with_chain(&[1000], &[SIAFUND_COUNT]);
    let segments = test_segments(4);

    // A contract's tax grows the pool by 40.
    let tx = contract_tx(
        harness.genesis_coin_id(0),
        test_contract(1000, 2, 4, &segments),
    );
    harness.extend(1, &[], vec![tx]).unwrap();
    assert_eq!(harness.siafund_pool(), Currency::from(40u64));

    // Spending the whole siafund supply claims the whole growth.
    let fund_id = harness.genesis_siafund_id(0);
    let spend = Transaction {
        siafund_inputs: vec![SiafundInput {
            parent_id: fund_id,
            unlock_conditions: test_unlock_conditions(),
            signatures: vec![vec![3]],
            claim_unlock_hash: test_unlock_hash(),
        }],
        siafund_outputs: vec![SiafundOutput {
            count: SIAFUND_COUNT,
            unlock_hash: test_unlock_hash(),
            claim_start: Currency::ZERO, // overridden by consensus
        }],
        ..Default::default()
    };
    let new_fund_id = spend.siafund_output_id(0);
    let report = harness.extend(2, &[], vec![spend]).unwrap();
    let claim_height = report.height + TEST_MATURITY_DELAY;

    // The claim is delayed; the replacement output snapshots the pool.
    let delayed = harness.delayed_outputs(claim_height);
    assert_eq!(delayed.len(), 1);
    assert_eq!(delayed[0].0, fund_id.claim_output_id());
    assert_eq!(delayed[0].1.value, Currency::from(40u64));
    let replacement = harness.siafund_output(&new_fund_id).expect("replacement");
    assert_eq!(replacement.claim_start, Currency::from(40u64));
    assert!(harness.siafund_output(&fund_id).is_none());
}

#[test]
fn value_mismatch_rejects_the_block() {
    let harness = ChainHarness::with_allocations(&[100]);
    let before = harness.checksum();
    let short = spend_tx(harness.genesis_coin_id(0), &[90], 0);
    let block = harness.block(harness.tip(), 1, &[], vec![short]);
    let err = harness.set.accept_block(block).unwrap_err();
    assert!(matches!(
        err,
        StateError::Rejected(BlockRejection::InvalidTransaction(
            TxError::ValueMismatch { .. }
        ))
    ));
    assert_eq!(harness.checksum(), before);
}
