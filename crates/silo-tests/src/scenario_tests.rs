//! Chain scenarios: simple apply, maturity, reorgs, quarantine.

use crate::generators::spend_tx;
use crate::harness::{ChainHarness, TEST_MATURITY_DELAY};
use silo_consensus::TxError;
use silo_state::{BlockRejection, ConsensusChange, ConsensusSubscriber, StateError};
use silo_types::{Block, BlockId, CoinOutputId, Currency};
use std::sync::Arc;

use parking_lot::Mutex;

#[test]
fn simple_apply_delays_miner_payout() {
    let harness = ChainHarness::new();
    let genesis = harness.genesis_id();

    let report = harness.extend(1, &[100], Vec::new()).unwrap();
    let b1 = report.applied[0];

    // Path is [genesis, B1].
    assert_eq!(harness.path_at(0), Some(genesis));
    assert_eq!(harness.path_at(1), Some(b1));
    assert_eq!(harness.tip(), b1);
    assert_eq!(harness.height(), 1);

    // The payout sits in the delayed bucket at 1 + maturity delay.
    let bucket = 1 + TEST_MATURITY_DELAY;
    let delayed = harness.delayed_outputs(bucket);
    assert_eq!(delayed.len(), 1);
    assert_eq!(delayed[0].0, Block::payout_id(&b1, 0));
    assert_eq!(delayed[0].1.value, Currency::from(100u64));
    assert!(harness.delayed_bucket_exists(bucket));

    // Spendable outputs and the pool are untouched.
    assert_eq!(harness.coin_output_count(), 0);
    assert_eq!(harness.siafund_pool(), Currency::ZERO);
}

#[test]
fn payout_matures_after_the_delay() {
    let harness = ChainHarness::new();
    let b1 = harness.extend(1, &[100], Vec::new()).unwrap().applied[0];
    let payout_id = Block::payout_id(&b1, 0);

    harness.extend_empty(TEST_MATURITY_DELAY);
    assert_eq!(harness.height(), 1 + TEST_MATURITY_DELAY);

    // The payout is spendable, the bucket is gone.
    let matured = harness.coin_output(&payout_id).expect("payout matured");
    assert_eq!(matured.value, Currency::from(100u64));
    assert!(harness.delayed_outputs(1 + TEST_MATURITY_DELAY).is_empty());
    assert!(!harness.delayed_bucket_exists(1 + TEST_MATURITY_DELAY));
}

#[test]
fn matured_output_is_spendable() {
    let harness = ChainHarness::new();
    let b1 = harness.extend(1, &[100], Vec::new()).unwrap().applied[0];
    harness.extend_empty(TEST_MATURITY_DELAY);

    let payout_id = Block::payout_id(&b1, 0);
    let tx = spend_tx(payout_id, &[60, 40], 0);
    let spent_outputs = (tx.coin_output_id(0), tx.coin_output_id(1));
    harness.extend(50, &[], vec![tx]).unwrap();

    assert!(harness.coin_output(&payout_id).is_none());
    assert_eq!(
        harness.coin_output(&spent_outputs.0).map(|o| o.value),
        Some(Currency::from(60u64))
    );
    assert_eq!(
        harness.coin_output(&spent_outputs.1).map(|o| o.value),
        Some(Currency::from(40u64))
    );
}

#[test]
fn reorg_matches_direct_application() {
    let forked = ChainHarness::new();
    let direct = ChainHarness::new();
    let genesis = forked.genesis_id();

    // Shared prefix B1, then fork: X = [B1, B2a], Y = [B1, B2b, B3b].
    let b1 = forked.block(genesis, 1, &[50], Vec::new());
    let b2a = forked.block(b1.id(), 2, &[60], Vec::new());
    let b2b = forked.block(b1.id(), 3, &[70], Vec::new());
    let b3b = forked.block(b2b.id(), 4, &[80], Vec::new());

    forked.set.accept_block(b1.clone()).unwrap();
    forked.set.accept_block(b2a.clone()).unwrap();

    // Equal height: held sideband, no state change.
    let held = forked.set.accept_block(b2b.clone()).unwrap();
    assert!(held.applied.is_empty());
    assert_eq!(held.tip, b2a.id());

    // One block past the tip: reorg.
    let report = forked.set.accept_block(b3b.clone()).unwrap();
    assert_eq!(report.reverted, vec![b2a.id()]);
    assert_eq!(report.applied, vec![b2b.id(), b3b.id()]);
    assert_eq!(report.tip, b3b.id());

    direct.set.accept_block(b1).unwrap();
    direct.set.accept_block(b2b).unwrap();
    direct.set.accept_block(b3b).unwrap();

    // Every table byte-identical to applying Y from genesis.
    assert_eq!(forked.checksum(), direct.checksum());
}

#[test]
fn mid_block_double_spend_quarantines_the_block() {
    let harness = ChainHarness::with_allocations(&[100]);
    let alloc = harness.genesis_coin_id(0);
    let before = harness.checksum();
    let tip_before = harness.tip();

    let tx1 = spend_tx(alloc, &[100], 0);
    let tx2 = spend_tx(alloc, &[60, 40], 0);
    let block = harness.block(tip_before, 1, &[], vec![tx1, tx2]);
    let block_id = block.id();

    let err = harness.set.accept_block(block).unwrap_err();
    assert!(matches!(
        err,
        StateError::Rejected(BlockRejection::InvalidTransaction(TxError::DoubleSpend(_)))
    ));

    // State equals the pre-block state; the block is quarantined.
    assert_eq!(harness.checksum(), before);
    assert_eq!(harness.tip(), tip_before);
    assert!(harness.set.has_been_seen(&block_id).unwrap());

    // Resubmission is a duplicate, children are refused.
    let err = harness
        .set
        .accept_block(harness.block(tip_before, 1, &[], vec![
            spend_tx(alloc, &[100], 0),
            spend_tx(alloc, &[60, 40], 0),
        ]))
        .unwrap_err();
    assert!(matches!(
        err,
        StateError::Rejected(BlockRejection::DuplicateBlock)
    ));

    let child = harness.block(block_id, 2, &[], Vec::new());
    let err = harness.set.accept_block(child).unwrap_err();
    assert!(matches!(
        err,
        StateError::Rejected(BlockRejection::QuarantinedParent)
    ));
}

#[test]
fn failed_reorg_unwinds_to_the_original_chain() {
    let harness = ChainHarness::with_allocations(&[100]);
    let genesis = harness.genesis_id();

    let b1 = harness.block(genesis, 1, &[], Vec::new());
    let b2 = harness.block(b1.id(), 2, &[], Vec::new());
    harness.set.accept_block(b1.clone()).unwrap();
    harness.set.accept_block(b2.clone()).unwrap();

    let before = harness.checksum();

    // Fork whose second block spends an unknown output.
    let b2b = harness.block(b1.id(), 3, &[], Vec::new());
    let bad_tx = spend_tx(CoinOutputId::from_bytes([0xBA; 32]), &[5], 0);
    let b3b = harness.block(b2b.id(), 4, &[], vec![bad_tx]);
    let b3b_id = b3b.id();

    harness.set.accept_block(b2b).unwrap();
    let err = harness.set.accept_block(b3b).unwrap_err();
    assert!(matches!(
        err,
        StateError::Rejected(BlockRejection::InvalidTransaction(TxError::UnknownInput(_)))
    ));

    // The original tip is back and every table is byte-identical.
    assert_eq!(harness.tip(), b2.id());
    assert_eq!(harness.checksum(), before);
    assert!(harness.set.has_been_seen(&b3b_id).unwrap());
}

#[test]
fn unknown_parent_is_an_invalid_successor() {
    let harness = ChainHarness::new();
    let orphan = harness.block(BlockId::from_bytes([0x0F; 32]), 1, &[], Vec::new());
    let err = harness.set.accept_block(orphan).unwrap_err();
    assert!(matches!(
        err,
        StateError::Rejected(BlockRejection::InvalidSuccessor)
    ));
}

#[test]
fn duplicate_block_is_rejected() {
    let harness = ChainHarness::new();
    let block = harness.block(harness.genesis_id(), 1, &[10], Vec::new());
    harness.set.accept_block(block.clone()).unwrap();
    let err = harness.set.accept_block(block).unwrap_err();
    assert!(matches!(
        err,
        StateError::Rejected(BlockRejection::DuplicateBlock)
    ));
}

#[test]
fn value_is_conserved_across_blocks() {
    let harness = ChainHarness::with_allocations(&[100]);

    harness.extend(1, &[50], Vec::new()).unwrap();
    let spend = spend_tx(harness.genesis_coin_id(0), &[90], 10);
    harness.extend(2, &[], vec![spend]).unwrap();

    // Spendable plus delayed equals allocations plus payouts minus the
    // burned fee: 100 + 50 - 10.
    let total = harness
        .total_coin_value()
        .checked_add(harness.total_delayed_value())
        .unwrap();
    assert_eq!(total, Currency::from(140u64));
}

struct VecSource(Vec<Block>);

impl silo_state::BlockSource for VecSource {
    fn next_block(&mut self) -> Option<Block> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.remove(0))
        }
    }
}

#[test]
fn writer_loop_drains_a_block_source() {
    let harness = ChainHarness::new();
    let genesis = harness.genesis_id();
    let b1 = harness.block(genesis, 1, &[10], Vec::new());
    let b2 = harness.block(b1.id(), 2, &[20], Vec::new());
    let b3 = harness.block(b2.id(), 3, &[30], Vec::new());

    let mut source = VecSource(vec![b1, b2, b3.clone()]);
    let shutdown = std::sync::atomic::AtomicBool::new(false);
    harness.set.run(&mut source, &shutdown);

    assert_eq!(harness.height(), 3);
    assert_eq!(harness.tip(), b3.id());
}

#[derive(Default)]
struct Recorder {
    changes: Mutex<Vec<ConsensusChange>>,
}

impl ConsensusSubscriber for Recorder {
    fn process_consensus_change(&self, change: &ConsensusChange) {
        self.changes.lock().push(change.clone());
    }
}

#[test]
fn subscribers_see_each_commit_once_in_order() {
    let recorder = Arc::new(Recorder::default());
    let harness = ChainHarness::new();
    harness.set.consensus_change_subscribe(recorder.clone());

    let genesis = harness.genesis_id();
    let b1 = harness.block(genesis, 1, &[10], Vec::new());
    let b2a = harness.block(b1.id(), 2, &[20], Vec::new());
    let b2b = harness.block(b1.id(), 3, &[30], Vec::new());
    let b3b = harness.block(b2b.id(), 4, &[40], Vec::new());

    harness.set.accept_block(b1.clone()).unwrap();
    harness.set.accept_block(b2a.clone()).unwrap();
    harness.set.accept_block(b2b.clone()).unwrap(); // held: no notification
    harness.set.accept_block(b3b.clone()).unwrap(); // reorg: one notification

    // Dropping the harness joins the dispatch thread, draining the queue.
    drop(harness);

    let changes = recorder.changes.lock();
    assert_eq!(changes.len(), 3);
    assert_eq!(changes[0].applied_blocks, vec![b1.id()]);
    assert_eq!(changes[1].applied_blocks, vec![b2a.id()]);
    assert_eq!(changes[2].reverted_blocks, vec![b2a.id()]);
    assert_eq!(changes[2].applied_blocks, vec![b2b.id(), b3b.id()]);
    // Each applied block carried one delayed-output diff (its payout).
    assert!(changes[2].diff_summary.delayed_coin_output_diffs >= 2);
}
