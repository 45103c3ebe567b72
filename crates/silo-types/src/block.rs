//! Blocks.

use crate::{
    hash_all, BlockId, CodecError, CoinOutput, CoinOutputId, Decoder, Encoder, Hash256,
    Transaction,
};

/// A block: parent link, proof-of-work fields, miner payouts, transactions.
///
/// Height is not stored; it is derived from the parent chain when the block
/// is processed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    /// Id of the parent block.
    pub parent_id: BlockId,
    /// Unix timestamp claimed by the miner.
    pub timestamp: u64,
    /// Proof-of-work nonce. Verification happens upstream; the diff engine
    /// only folds it into the content hash.
    pub nonce: u64,
    /// Coinbase and fee payouts, delayed until maturity.
    pub miner_payouts: Vec<CoinOutput>,
    /// Ordered transactions.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Content hash identifying the block.
    pub fn id(&self) -> BlockId {
        BlockId(hash_all(&[b"block", &self.to_bytes()]))
    }

    /// Id of the delayed coin output created for the payout at `index`.
    pub fn miner_payout_id(&self, index: u64) -> CoinOutputId {
        Self::payout_id(&self.id(), index)
    }

    /// Payout id derivation for callers that already hold the block id.
    pub fn payout_id(block_id: &BlockId, index: u64) -> CoinOutputId {
        CoinOutputId(hash_all(&[
            b"miner-payout",
            block_id.as_ref(),
            &index.to_be_bytes(),
        ]))
    }

    pub fn encode(&self, enc: &mut Encoder) {
        enc.write_hash(self.parent_id.as_bytes());
        enc.write_u64(self.timestamp);
        enc.write_u64(self.nonce);
        enc.write_len(self.miner_payouts.len());
        for payout in &self.miner_payouts {
            payout.encode(enc);
        }
        enc.write_len(self.transactions.len());
        for tx in &self.transactions {
            tx.encode(enc);
        }
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let parent_id = BlockId(Hash256(dec.read_hash()?));
        let timestamp = dec.read_u64()?;
        let nonce = dec.read_u64()?;
        let payout_count = dec.read_len()?;
        let mut miner_payouts = Vec::with_capacity(payout_count);
        for _ in 0..payout_count {
            miner_payouts.push(CoinOutput::decode(dec)?);
        }
        let tx_count = dec.read_len()?;
        let mut transactions = Vec::with_capacity(tx_count);
        for _ in 0..tx_count {
            transactions.push(Transaction::decode(dec)?);
        }
        Ok(Self {
            parent_id,
            timestamp,
            nonce,
            miner_payouts,
            transactions,
        })
    }

    /// Standalone encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode(&mut enc);
        enc.into_bytes()
    }

    /// Decode a standalone encoding, rejecting trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut dec = Decoder::new(bytes);
        let block = Self::decode(&mut dec)?;
        dec.finish()?;
        Ok(block)
    }
}
