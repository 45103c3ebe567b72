//! Error types for the state engine.
//!
//! Three tiers: block-scoped rejections (the block is quarantined, the node
//! keeps running), fatal corruption (the node stops accepting blocks), and
//! storage errors (retried once at the transaction boundary, then escalated
//! to corruption).

use silo_consensus::TxError;
use silo_storage::StorageError;
use silo_types::CodecError;
use thiserror::Error;

/// Why a block was rejected. Non-fatal; the offending block is quarantined.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockRejection {
    /// A transaction failed validation during application.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(#[from] TxError),

    /// The block does not attach to a known block.
    #[error("block is not a valid successor of any known block")]
    InvalidSuccessor,

    /// The block was already processed (accepted or quarantined).
    #[error("block already seen")]
    DuplicateBlock,

    /// The block extends a quarantined block.
    #[error("parent block is quarantined")]
    QuarantinedParent,
}

/// State engine errors.
#[derive(Error, Debug)]
pub enum StateError {
    /// A block was rejected; state has been restored.
    #[error("block rejected: {0}")]
    Rejected(#[from] BlockRejection),

    /// A consensus invariant was violated. The node must stop accepting
    /// blocks; recovery requires re-syncing from a trusted checkpoint.
    #[error("consensus corruption: {0}")]
    Corruption(String),

    /// A storage operation failed (before retry escalation).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<CodecError> for StateError {
    /// Persisted state that no longer decodes is corruption.
    fn from(err: CodecError) -> Self {
        StateError::Corruption(format!("undecodable stored data: {err}"))
    }
}

impl StateError {
    /// Shorthand for corruption errors.
    pub fn corruption(msg: impl Into<String>) -> Self {
        StateError::Corruption(msg.into())
    }

    /// Whether the error poisons the consensus set.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StateError::Corruption(_) | StateError::Storage(_))
    }
}

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;
