//! Error types for transaction validation.
//!
//! Every variant is block-scoped and non-fatal: it invalidates the block
//! under application but never the node.

use silo_types::Currency;
use thiserror::Error;

/// Transaction validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    /// A referenced output or contract does not exist in the current state.
    #[error("unknown input: {0}")]
    UnknownInput(String),

    /// An output was already spent on this chain path.
    #[error("double spend: {0}")]
    DoubleSpend(String),

    /// Inflow and outflow do not balance.
    #[error("value mismatch: inflow {inflow}, outflow {outflow}")]
    ValueMismatch { inflow: Currency, outflow: Currency },

    /// Unlock conditions do not match the output or the signatures fail.
    #[error("invalid unlock of {0}")]
    InvalidUnlock(String),

    /// A newly formed file contract is malformed.
    #[error("invalid file contract: {0}")]
    InvalidContract(&'static str),

    /// A revision of an existing file contract is not acceptable.
    #[error("invalid revision of {id}: {reason}")]
    InvalidRevision { id: String, reason: &'static str },

    /// A storage proof was submitted outside the contract's proof window.
    #[error("storage proof for {id} outside window [{window_start}, {window_end}) at height {height}")]
    LateProof {
        id: String,
        window_start: u64,
        window_end: u64,
        height: u64,
    },

    /// A storage proof's merkle path does not reach the file merkle root.
    #[error("invalid storage proof for {0}")]
    InvalidStorageProof(String),
}
