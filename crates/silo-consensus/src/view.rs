//! Read access to the consensus state during validation.

use silo_types::{BlockId, CoinOutput, CoinOutputId, Currency, FileContract, FileContractId,
    SiafundOutput, SiafundOutputId};

/// Read-only view of the consensus state, as seen mid-block.
///
/// Implemented by the state engine over its open write transaction: lookups
/// observe the effects of transactions already applied from the same block.
/// A storage failure surfaces as `None` here and is re-raised as a fatal
/// error by the implementor after validation returns.
pub trait StateView {
    /// The spendable coin output with the given id, if any.
    fn coin_output(&self, id: &CoinOutputId) -> Option<CoinOutput>;

    /// The siafund output with the given id, if any.
    fn siafund_output(&self, id: &SiafundOutputId) -> Option<SiafundOutput>;

    /// The open file contract with the given id, if any.
    fn file_contract(&self, id: &FileContractId) -> Option<FileContract>;

    /// Current siafund pool value.
    fn siafund_pool(&self) -> Currency;

    /// Height of the block under application.
    fn block_height(&self) -> u64;

    /// Id of the canonical block at the given height, if on the path.
    ///
    /// Used to seed the storage-proof challenge.
    fn path_block_id(&self, height: u64) -> Option<BlockId>;
}
