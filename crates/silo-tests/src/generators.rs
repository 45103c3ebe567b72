//! Test data generators.
//!
//! Builders for transactions, file contracts, and storage proofs that
//! satisfy the validator, so tests only spell out what they vary.

use crate::harness::{test_unlock_conditions, test_unlock_hash};
use silo_consensus::params::contract_tax;
use silo_consensus::{audit_path, merkle_root, segment_index, MerkleLeaf};
use silo_types::{
    Block, CoinInput, CoinOutput, CoinOutputId, Currency, FileContract, FileContractId,
    StorageProof, Transaction, UnlockHash, SEGMENT_SIZE,
};

/// A deterministic 32-byte id from a seed byte.
pub fn test_id(seed: u8) -> [u8; 32] {
    let mut id = [0u8; 32];
    id[0] = seed;
    id[31] = seed.wrapping_mul(7);
    id
}

/// A spend of one coin output into the given values, with an optional fee.
/// Inputs must cover outputs plus fee exactly; the caller picks the split.
pub fn spend_tx(parent: CoinOutputId, outputs: &[u64], fee: u64) -> Transaction {
    Transaction {
        coin_inputs: vec![CoinInput {
            parent_id: parent,
            unlock_conditions: test_unlock_conditions(),
            signatures: vec![vec![1]],
        }],
        coin_outputs: outputs
            .iter()
            .map(|&value| CoinOutput {
                value: Currency::from(value),
                unlock_hash: test_unlock_hash(),
            })
            .collect(),
        miner_fees: if fee == 0 {
            Vec::new()
        } else {
            vec![Currency::from(fee)]
        },
        ..Default::default()
    }
}

/// File segments with recognizable content.
pub fn test_segments(count: usize) -> Vec<MerkleLeaf> {
    (0..count)
        .map(|i| {
            let mut segment = [0u8; SEGMENT_SIZE];
            segment[0] = i as u8;
            segment[1] = 0xF1;
            segment
        })
        .collect()
}

/// A well-formed contract over the given segments.
///
/// Both payout alternatives sum to the payout minus the contract tax, as the
/// validator requires.
pub fn test_contract(
    payout: u64,
    window_start: u64,
    window_end: u64,
    segments: &[MerkleLeaf],
) -> FileContract {
    let payout = Currency::from(payout);
    let after_tax = payout
        .checked_sub(contract_tax(payout))
        .expect("payout covers tax");
    let alternative = vec![CoinOutput {
        value: after_tax,
        unlock_hash: test_unlock_hash(),
    }];
    FileContract {
        file_size: (segments.len() * SEGMENT_SIZE) as u64,
        file_merkle_root: merkle_root(segments),
        window_start,
        window_end,
        payout,
        valid_proof_outputs: alternative.clone(),
        missed_proof_outputs: alternative,
        unlock_hash: test_unlock_hash(),
        revision_number: 0,
    }
}

/// A transaction funding `contract` entirely from one coin output.
/// The input value must equal the contract payout.
pub fn contract_tx(parent: CoinOutputId, contract: FileContract) -> Transaction {
    Transaction {
        coin_inputs: vec![CoinInput {
            parent_id: parent,
            unlock_conditions: test_unlock_conditions(),
            signatures: vec![vec![1]],
        }],
        file_contracts: vec![contract],
        ..Default::default()
    }
}

/// A storage proof answering the challenge seeded by the path block at the
/// contract's window start.
pub fn proof_tx(
    contract_id: FileContractId,
    contract: &FileContract,
    segments: &[MerkleLeaf],
    window_start_block: &silo_types::BlockId,
) -> Transaction {
    let index = segment_index(window_start_block, &contract_id, contract.segment_count());
    Transaction {
        storage_proofs: vec![StorageProof {
            parent_id: contract_id,
            segment: segments[index as usize],
            hash_set: audit_path(segments, index),
        }],
        ..Default::default()
    }
}

/// Sum of the miner payouts of a block.
pub fn payout_total(block: &Block) -> Currency {
    block
        .miner_payouts
        .iter()
        .map(|payout| payout.value)
        .sum()
}

/// The unlock hash outputs in generated transactions pay to.
pub fn beneficiary() -> UnlockHash {
    test_unlock_hash()
}
