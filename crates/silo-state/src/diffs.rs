//! Reversible state-change records.
//!
//! Each block changes the consensus set in a deterministic way; the changes
//! are recorded as diffs for rewinding and reapplying. A diff's direction
//! records what the block did (`Apply` = created, `Revert` = consumed); the
//! commit direction chooses whether the block's effect is being installed or
//! undone. When the two agree the natural operation runs (insert, pool
//! increase); when they differ, the opposite.
//!
//! The category order {coin, file contract, siafund, delayed coin, siafund
//! pool} and the in-category record order are load-bearing: they are part of
//! the persisted encoding, and replaying a stored diff set must reproduce the
//! recorded state transition bit for bit.

use crate::store::StateStore;
use crate::{StateError, StateResult};
use silo_types::{
    CodecError, CoinOutput, CoinOutputId, Currency, Decoder, Encoder, FileContract,
    FileContractId, Hash256, SiafundOutput, SiafundOutputId,
};

/// Whether a diff records a creation or a consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffDirection {
    /// The block created the object (or grew the pool).
    Apply,
    /// The block consumed the object.
    Revert,
}

impl DiffDirection {
    /// The opposite direction.
    pub fn inverse(self) -> Self {
        match self {
            DiffDirection::Apply => DiffDirection::Revert,
            DiffDirection::Revert => DiffDirection::Apply,
        }
    }

    fn encode(self, enc: &mut Encoder) {
        enc.write_u8(match self {
            DiffDirection::Apply => 0,
            DiffDirection::Revert => 1,
        });
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        match dec.read_u8()? {
            0 => Ok(DiffDirection::Apply),
            1 => Ok(DiffDirection::Revert),
            _ => Err(CodecError::InvalidField("diff direction")),
        }
    }
}

/// Creation or consumption of a spendable coin output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinOutputDiff {
    pub direction: DiffDirection,
    pub id: CoinOutputId,
    pub output: CoinOutput,
}

/// Creation or consumption of a file contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContractDiff {
    pub direction: DiffDirection,
    pub id: FileContractId,
    pub contract: FileContract,
}

/// Creation or consumption of a siafund output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiafundOutputDiff {
    pub direction: DiffDirection,
    pub id: SiafundOutputId,
    pub output: SiafundOutput,
}

/// Creation or consumption of a delayed coin output in a maturity bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayedCoinOutputDiff {
    pub direction: DiffDirection,
    pub maturity_height: u64,
    pub id: CoinOutputId,
    pub output: CoinOutput,
}

/// A growth step of the siafund pool.
///
/// Always recorded with `direction = Apply`; reversal swaps the two values at
/// commit time. `adjusted >= previous` always.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiafundPoolDiff {
    pub direction: DiffDirection,
    pub previous: Currency,
    pub adjusted: Currency,
}

/// Per-category record counts, pushed to subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub coin_output_diffs: usize,
    pub file_contract_diffs: usize,
    pub siafund_output_diffs: usize,
    pub delayed_coin_output_diffs: usize,
    pub siafund_pool_diffs: usize,
}

impl DiffSummary {
    /// Accumulate another diff set's counts.
    pub fn add(&mut self, set: &DiffSet) {
        self.coin_output_diffs += set.coin_output_diffs.len();
        self.file_contract_diffs += set.file_contract_diffs.len();
        self.siafund_output_diffs += set.siafund_output_diffs.len();
        self.delayed_coin_output_diffs += set.delayed_coin_output_diffs.len();
        self.siafund_pool_diffs += set.siafund_pool_diffs.len();
    }
}

/// Every state change a block induces, in recorded order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSet {
    pub coin_output_diffs: Vec<CoinOutputDiff>,
    pub file_contract_diffs: Vec<FileContractDiff>,
    pub siafund_output_diffs: Vec<SiafundOutputDiff>,
    pub delayed_coin_output_diffs: Vec<DelayedCoinOutputDiff>,
    pub siafund_pool_diffs: Vec<SiafundPoolDiff>,
}

impl DiffSet {
    /// Whether no diffs were recorded.
    pub fn is_empty(&self) -> bool {
        self.coin_output_diffs.is_empty()
            && self.file_contract_diffs.is_empty()
            && self.siafund_output_diffs.is_empty()
            && self.delayed_coin_output_diffs.is_empty()
            && self.siafund_pool_diffs.is_empty()
    }

    pub fn encode(&self, enc: &mut Encoder) {
        enc.write_len(self.coin_output_diffs.len());
        for diff in &self.coin_output_diffs {
            diff.direction.encode(enc);
            enc.write_hash(diff.id.as_bytes());
            diff.output.encode(enc);
        }
        enc.write_len(self.file_contract_diffs.len());
        for diff in &self.file_contract_diffs {
            diff.direction.encode(enc);
            enc.write_hash(diff.id.as_bytes());
            diff.contract.encode(enc);
        }
        enc.write_len(self.siafund_output_diffs.len());
        for diff in &self.siafund_output_diffs {
            diff.direction.encode(enc);
            enc.write_hash(diff.id.as_bytes());
            diff.output.encode(enc);
        }
        enc.write_len(self.delayed_coin_output_diffs.len());
        for diff in &self.delayed_coin_output_diffs {
            diff.direction.encode(enc);
            enc.write_u64(diff.maturity_height);
            enc.write_hash(diff.id.as_bytes());
            diff.output.encode(enc);
        }
        enc.write_len(self.siafund_pool_diffs.len());
        for diff in &self.siafund_pool_diffs {
            diff.direction.encode(enc);
            enc.write_currency(diff.previous);
            enc.write_currency(diff.adjusted);
        }
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let mut set = DiffSet::default();
        for _ in 0..dec.read_len()? {
            set.coin_output_diffs.push(CoinOutputDiff {
                direction: DiffDirection::decode(dec)?,
                id: CoinOutputId(Hash256(dec.read_hash()?)),
                output: CoinOutput::decode(dec)?,
            });
        }
        for _ in 0..dec.read_len()? {
            set.file_contract_diffs.push(FileContractDiff {
                direction: DiffDirection::decode(dec)?,
                id: FileContractId(Hash256(dec.read_hash()?)),
                contract: FileContract::decode(dec)?,
            });
        }
        for _ in 0..dec.read_len()? {
            set.siafund_output_diffs.push(SiafundOutputDiff {
                direction: DiffDirection::decode(dec)?,
                id: SiafundOutputId(Hash256(dec.read_hash()?)),
                output: SiafundOutput::decode(dec)?,
            });
        }
        for _ in 0..dec.read_len()? {
            set.delayed_coin_output_diffs.push(DelayedCoinOutputDiff {
                direction: DiffDirection::decode(dec)?,
                maturity_height: dec.read_u64()?,
                id: CoinOutputId(Hash256(dec.read_hash()?)),
                output: CoinOutput::decode(dec)?,
            });
        }
        for _ in 0..dec.read_len()? {
            set.siafund_pool_diffs.push(SiafundPoolDiff {
                direction: DiffDirection::decode(dec)?,
                previous: dec.read_currency()?,
                adjusted: dec.read_currency()?,
            });
        }
        Ok(set)
    }
}

impl StateStore {
    /// Apply or revert a coin output diff.
    pub(crate) fn commit_coin_output_diff(
        &mut self,
        diff: &CoinOutputDiff,
        dir: DiffDirection,
    ) -> StateResult<()> {
        if diff.direction == dir {
            self.insert_coin_output(&diff.id, &diff.output)
        } else {
            self.remove_coin_output(&diff.id)
        }
    }

    /// Apply or revert a file contract diff.
    pub(crate) fn commit_file_contract_diff(
        &mut self,
        diff: &FileContractDiff,
        dir: DiffDirection,
    ) -> StateResult<()> {
        if diff.direction == dir {
            self.insert_file_contract(&diff.id, &diff.contract)
        } else {
            self.remove_file_contract(&diff.id, &diff.contract)
        }
    }

    /// Apply or revert a siafund output diff.
    pub(crate) fn commit_siafund_output_diff(
        &mut self,
        diff: &SiafundOutputDiff,
        dir: DiffDirection,
    ) -> StateResult<()> {
        if diff.direction == dir {
            self.insert_siafund_output(&diff.id, &diff.output)
        } else {
            self.remove_siafund_output(&diff.id)
        }
    }

    /// Apply or revert a delayed coin output diff.
    pub(crate) fn commit_delayed_coin_output_diff(
        &mut self,
        diff: &DelayedCoinOutputDiff,
        dir: DiffDirection,
    ) -> StateResult<()> {
        if diff.direction == dir {
            self.insert_delayed_output(diff.maturity_height, &diff.id, &diff.output)
        } else {
            self.remove_delayed_output(diff.maturity_height, &diff.id)
        }
    }

    /// Apply or revert a siafund pool diff.
    ///
    /// The pool only ever grows, and successive diffs chain by equality;
    /// any disagreement with the recorded values is corruption.
    pub(crate) fn commit_siafund_pool_diff(
        &mut self,
        diff: &SiafundPoolDiff,
        dir: DiffDirection,
    ) -> StateResult<()> {
        if diff.adjusted < diff.previous {
            return Err(StateError::corruption(
                "siafund pool diff with negative adjustment",
            ));
        }
        if diff.direction != DiffDirection::Apply {
            return Err(StateError::corruption(
                "siafund pool diff without the apply direction",
            ));
        }
        let pool = self.siafund_pool()?;
        match dir {
            DiffDirection::Apply => {
                if pool != diff.previous {
                    return Err(StateError::corruption(
                        "siafund pool diff with an invalid previous value",
                    ));
                }
                self.set_siafund_pool(diff.adjusted)
            }
            DiffDirection::Revert => {
                if pool != diff.adjusted {
                    return Err(StateError::corruption(
                        "siafund pool diff with an invalid adjusted value",
                    ));
                }
                self.set_siafund_pool(diff.previous)
            }
        }
    }
}
