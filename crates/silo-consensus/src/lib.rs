//! # silo-consensus
//!
//! Transaction-level consensus rules for the silo blockchain.
//!
//! This crate provides:
//! - `TxValidator`: validates one transaction against a (partially applied)
//!   state view, tracking intra-block double spends
//! - The `UnlockVerifier` seam delegating signature checks to the crypto
//!   collaborator
//! - Storage-proof challenge derivation and merkle audit-path verification
//!
//! The rules here are stateless per call: all chain state is read through the
//! [`StateView`] trait, which the state engine implements over its open write
//! transaction so that later transactions in a block see the effects of
//! earlier ones.

mod error;
mod proofs;
mod validate;
mod view;

pub use error::TxError;
pub use proofs::{
    audit_path, merkle_root, segment_index, verify_segment, MerkleLeaf,
};
pub use validate::{SpentOutputs, TxValidator, UnlockVerifier};
pub use view::StateView;

use silo_types::Currency;

/// Chain constants.
pub mod params {
    use silo_types::Currency;

    /// Total number of siafund shares in existence.
    pub const SIAFUND_COUNT: u64 = 10_000;

    /// Divisor of the contract tax: each file contract pays
    /// `payout / CONTRACT_TAX_DIVISOR` into the siafund pool.
    pub const CONTRACT_TAX_DIVISOR: u64 = 25;

    /// Default number of blocks between creation and spendability of delayed
    /// outputs. Test networks override this in their chain config.
    pub const DEFAULT_MATURITY_DELAY: u64 = 144;

    /// The siafund-pool contribution of a contract with the given payout.
    pub fn contract_tax(payout: Currency) -> Currency {
        payout.div_floor(CONTRACT_TAX_DIVISOR)
    }
}

/// Sum of a contract's payout alternative, if it does not overflow.
pub fn payout_sum(outputs: &[silo_types::CoinOutput]) -> Option<Currency> {
    outputs
        .iter()
        .try_fold(Currency::ZERO, |acc, out| acc.checked_add(out.value))
}
