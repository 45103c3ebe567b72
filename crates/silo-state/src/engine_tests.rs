//! Engine-level tests driving the applier and diff commit directly.
//!
//! These exercise the reversibility contract below the public facade:
//! applying, reverting, and reapplying recorded diff sets must move the
//! state between byte-identical snapshots, and reverting a committed block
//! must never trip a store sanity check.

use crate::diffs::DiffDirection;
use crate::processed::ProcessedBlock;
use crate::set::{ChainConfig, ConsensusState};
use crate::store::StateStore;
use crate::StateError;
use silo_consensus::UnlockVerifier;
use silo_storage::Database;
use silo_types::{
    Block, CoinInput, CoinOutput, Currency, Hash256, Signature, Transaction, UnlockConditions,
};
use std::sync::Arc;
use tempfile::TempDir;

struct AlwaysValid;

impl UnlockVerifier for AlwaysValid {
    fn verify_unlock(&self, _: &UnlockConditions, _: &[Signature], _: &Hash256) -> bool {
        true
    }
}

const MATURITY_DELAY: u64 = 2;

fn conditions() -> UnlockConditions {
    UnlockConditions {
        timelock: 0,
        public_keys: vec![vec![9]],
        signatures_required: 1,
    }
}

fn config(allocations: &[u64]) -> ChainConfig {
    ChainConfig {
        maturity_delay: MATURITY_DELAY,
        record_checksums: false,
        genesis_timestamp: 500,
        genesis_coin_allocations: allocations
            .iter()
            .map(|&value| CoinOutput {
                value: Currency::from(value),
                unlock_hash: conditions().unlock_hash(),
            })
            .collect(),
        genesis_siafund_allocations: Vec::new(),
    }
}

fn test_state(allocations: &[u64]) -> (ConsensusState, ChainConfig, TempDir) {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(tmp.path()).unwrap();
    let chain_config = config(allocations);
    let mut state = ConsensusState {
        store: StateStore::new(Arc::new(db)),
        maturity_delay: MATURITY_DELAY,
        record_checksums: false,
        verifier: Arc::new(AlwaysValid),
    };
    state.install_genesis(&chain_config).unwrap();
    (state, chain_config, tmp)
}

fn block_on(parent: silo_types::BlockId, nonce: u64, payouts: &[u64]) -> Block {
    Block {
        parent_id: parent,
        timestamp: 500 + nonce,
        nonce,
        miner_payouts: payouts
            .iter()
            .map(|&value| CoinOutput {
                value: Currency::from(value),
                unlock_hash: conditions().unlock_hash(),
            })
            .collect(),
        transactions: Vec::new(),
    }
}

fn apply_block(state: &mut ConsensusState, nonce: u64, payouts: &[u64]) -> ProcessedBlock {
    let height = state.store.tip_height().unwrap() + 1;
    let block = block_on(state.store.tip().unwrap(), nonce, payouts);
    let mut pb = ProcessedBlock::new(block, height);
    state.store.begin().unwrap();
    state.store.put_processed_block(&pb).unwrap();
    state.store.commit().unwrap();
    state.generate_and_apply(&mut pb).unwrap();
    pb
}

fn revert_block(state: &mut ConsensusState, pb: &ProcessedBlock) {
    state.store.begin().unwrap();
    state.commit_diff_set(pb, DiffDirection::Revert).unwrap();
    state.store.commit().unwrap();
}

fn reapply_block(state: &mut ConsensusState, pb: &ProcessedBlock) {
    state.store.begin().unwrap();
    state.commit_diff_set(pb, DiffDirection::Apply).unwrap();
    state.store.commit().unwrap();
}

#[test]
fn apply_revert_apply_is_idempotent() {
    let (mut state, _config, _tmp) = test_state(&[]);
    let genesis_checksum = state.store.consensus_checksum().unwrap();

    let pb = apply_block(&mut state, 1, &[75]);
    let applied_checksum = state.store.consensus_checksum().unwrap();
    assert_ne!(genesis_checksum, applied_checksum);

    revert_block(&mut state, &pb);
    assert_eq!(state.store.consensus_checksum().unwrap(), genesis_checksum);

    reapply_block(&mut state, &pb);
    assert_eq!(state.store.consensus_checksum().unwrap(), applied_checksum);
}

#[test]
fn reverting_a_whole_prefix_restores_genesis_byte_for_byte() {
    let (mut state, config, _tmp) = test_state(&[500]);
    let genesis_checksum = state.store.consensus_checksum().unwrap();
    let genesis_id = config.genesis_block().id();
    let alloc = ChainConfig::genesis_coin_output_id(&genesis_id, 0);

    // A prefix long enough to mature the first payout and spend it.
    let mut chain = Vec::new();
    chain.push(apply_block(&mut state, 1, &[40]));
    for nonce in 2..=(1 + MATURITY_DELAY) {
        chain.push(apply_block(&mut state, nonce, &[]));
    }

    // One more block spending the genesis allocation.
    let height = state.store.tip_height().unwrap() + 1;
    let spend = Transaction {
        coin_inputs: vec![CoinInput {
            parent_id: alloc,
            unlock_conditions: conditions(),
            signatures: vec![vec![1]],
        }],
        coin_outputs: vec![CoinOutput {
            value: Currency::from(500u64),
            unlock_hash: conditions().unlock_hash(),
        }],
        ..Default::default()
    };
    let block = Block {
        parent_id: state.store.tip().unwrap(),
        timestamp: 999,
        nonce: 99,
        miner_payouts: Vec::new(),
        transactions: vec![spend],
    };
    let mut pb = ProcessedBlock::new(block, height);
    state.store.begin().unwrap();
    state.store.put_processed_block(&pb).unwrap();
    state.store.commit().unwrap();
    state.generate_and_apply(&mut pb).unwrap();
    chain.push(pb);

    // Reverting the full prefix in reverse order hits no sanity errors and
    // lands exactly on the genesis state.
    for pb in chain.iter().rev() {
        revert_block(&mut state, pb);
    }
    assert_eq!(state.store.consensus_checksum().unwrap(), genesis_checksum);
    assert_eq!(state.store.tip().unwrap(), genesis_id);
}

#[test]
fn regenerating_diffs_is_corruption() {
    let (mut state, _config, _tmp) = test_state(&[]);
    let mut pb = apply_block(&mut state, 1, &[10]);
    assert!(matches!(
        state.generate_and_apply(&mut pb),
        Err(StateError::Corruption(_))
    ));
}

#[test]
fn committing_against_the_wrong_tip_is_corruption() {
    let (mut state, _config, _tmp) = test_state(&[]);
    let pb1 = apply_block(&mut state, 1, &[10]);
    let _pb2 = apply_block(&mut state, 2, &[20]);

    // pb1 is no longer the tip; reverting it out of order must refuse.
    state.store.begin().unwrap();
    assert!(matches!(
        state.commit_diff_set(&pb1, DiffDirection::Revert),
        Err(StateError::Corruption(_))
    ));
    state.store.rollback();

    // Applying it again while it is already on the path must refuse too.
    state.store.begin().unwrap();
    assert!(matches!(
        state.commit_diff_set(&pb1, DiffDirection::Apply),
        Err(StateError::Corruption(_))
    ));
    state.store.rollback();
}

#[test]
fn failed_block_leaves_no_trace_but_the_quarantine_entry() {
    let (mut state, config, _tmp) = test_state(&[100]);
    let genesis_id = config.genesis_block().id();
    let alloc = ChainConfig::genesis_coin_output_id(&genesis_id, 0);
    let before = state.store.consensus_checksum().unwrap();

    let double_spend = |outputs: &[u64]| Transaction {
        coin_inputs: vec![CoinInput {
            parent_id: alloc,
            unlock_conditions: conditions(),
            signatures: vec![vec![1]],
        }],
        coin_outputs: outputs
            .iter()
            .map(|&value| CoinOutput {
                value: Currency::from(value),
                unlock_hash: conditions().unlock_hash(),
            })
            .collect(),
        ..Default::default()
    };
    let block = Block {
        parent_id: genesis_id,
        timestamp: 600,
        nonce: 5,
        miner_payouts: vec![],
        transactions: vec![double_spend(&[100]), double_spend(&[50, 50])],
    };
    let id = block.id();
    let mut pb = ProcessedBlock::new(block, 1);
    state.store.begin().unwrap();
    state.store.put_processed_block(&pb).unwrap();
    state.store.commit().unwrap();

    assert!(matches!(
        state.generate_and_apply(&mut pb),
        Err(StateError::Rejected(_))
    ));
    assert_eq!(state.store.consensus_checksum().unwrap(), before);
    assert!(state.store.is_dos_block(&id).unwrap());
    assert!(!state.store.has_processed_block(&id).unwrap());
}
