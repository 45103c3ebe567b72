//! Processed blocks.

use crate::diffs::DiffSet;
use silo_types::{Block, BlockId, CodecError, Decoder, Encoder, Hash256};

/// A block augmented with its position and generated diff set.
///
/// `diffs_generated` is false exactly once, before the first successful
/// generation; afterwards the diff set is immutable and replayable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedBlock {
    /// The underlying block.
    pub block: Block,
    /// Cached content hash of `block`.
    pub id: BlockId,
    /// Height on its chain (parent height + 1).
    pub height: u64,
    /// Cached parent id.
    pub parent_id: BlockId,
    /// Whether `diff_set` has been generated.
    pub diffs_generated: bool,
    /// Every state change this block induces, in recorded order.
    pub diff_set: DiffSet,
    /// Post-application state checksum, recorded when checksum recording is
    /// enabled.
    pub consensus_hash: Option<Hash256>,
}

impl ProcessedBlock {
    /// Wrap a block at the given height, with no diffs generated yet.
    pub fn new(block: Block, height: u64) -> Self {
        let id = block.id();
        let parent_id = block.parent_id;
        Self {
            block,
            id,
            height,
            parent_id,
            diffs_generated: false,
            diff_set: DiffSet::default(),
            consensus_hash: None,
        }
    }

    /// Standalone encoding, used as the block-map table value.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_var_bytes(&self.block.to_bytes());
        enc.write_u64(self.height);
        enc.write_u8(self.diffs_generated as u8);
        self.diff_set.encode(&mut enc);
        match &self.consensus_hash {
            Some(hash) => {
                enc.write_u8(1);
                enc.write_hash(&hash.0);
            }
            None => enc.write_u8(0),
        }
        enc.into_bytes()
    }

    /// Decode a standalone encoding, rejecting trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut dec = Decoder::new(bytes);
        let block = Block::from_bytes(&dec.read_var_bytes()?)?;
        let height = dec.read_u64()?;
        let diffs_generated = match dec.read_u8()? {
            0 => false,
            1 => true,
            _ => return Err(CodecError::InvalidField("diffs_generated")),
        };
        let diff_set = DiffSet::decode(&mut dec)?;
        let consensus_hash = match dec.read_u8()? {
            0 => None,
            1 => Some(Hash256(dec.read_hash()?)),
            _ => return Err(CodecError::InvalidField("consensus_hash")),
        };
        dec.finish()?;
        let id = block.id();
        let parent_id = block.parent_id;
        Ok(Self {
            block,
            id,
            height,
            parent_id,
            diffs_generated,
            diff_set,
            consensus_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diffs::{CoinOutputDiff, DiffDirection};
    use silo_types::{CoinOutput, CoinOutputId, Currency, UnlockHash};

    #[test]
    fn round_trip_preserves_diff_set_bytes() {
        let block = Block {
            parent_id: BlockId::from_bytes([1; 32]),
            timestamp: 99,
            ..Default::default()
        };
        let mut pb = ProcessedBlock::new(block, 7);
        pb.diffs_generated = true;
        pb.diff_set.coin_output_diffs.push(CoinOutputDiff {
            direction: DiffDirection::Revert,
            id: CoinOutputId::from_bytes([2; 32]),
            output: CoinOutput {
                value: Currency::from(11u64),
                unlock_hash: UnlockHash::from_bytes([3; 32]),
            },
        });

        let bytes = pb.to_bytes();
        let decoded = ProcessedBlock::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, pb);
        assert_eq!(decoded.id, pb.block.id());
        // Bit-exact re-encoding: a restart replays the same diff set.
        assert_eq!(decoded.to_bytes(), bytes);
    }
}
