//! # silo-state
//!
//! The consensus diff engine for the silo blockchain.
//!
//! Each confirmed block deterministically mutates the consensus state; the
//! mutation is recorded as a diff set so it can be reversed during chain
//! reorganization. This crate provides:
//!
//! - `StateStore`: the transactional five-table consensus store
//! - The diff records and their apply/revert commit semantics
//! - The block applier (`generate_and_apply`, `commit_diff_set`)
//! - Per-block maturity maintenance (delayed outputs, contract expirations)
//! - Reorg coordination with full unwind on failure
//! - `ConsensusSet`: the locked facade with admission checks, quarantine,
//!   and subscriber fan-out
//!
//! ## Architecture
//!
//! A validated candidate block enters through `ConsensusSet::accept_block`.
//! If it extends the tip, diffs are generated while validating, transaction
//! by transaction, and committed under one write transaction. If it forks
//! past the tip, the reorg coordinator reverts stored diff sets back to the
//! common ancestor and applies forward. Blocks proven invalid mid-application
//! are rewound and quarantined by id.

mod applier;
mod diffs;
#[cfg(test)]
mod engine_tests;
mod error;
mod fork;
mod maturity;
mod processed;
mod set;
mod store;
mod subscribe;

pub use diffs::{
    CoinOutputDiff, DelayedCoinOutputDiff, DiffDirection, DiffSet, DiffSummary, FileContractDiff,
    SiafundOutputDiff, SiafundPoolDiff,
};
pub use error::{BlockRejection, StateError, StateResult};
pub use processed::ProcessedBlock;
pub use set::{BlockSource, ChainConfig, ConsensusSet, NewTipReport};
pub use store::StateStore;
pub use subscribe::{ConsensusChange, ConsensusSubscriber};
