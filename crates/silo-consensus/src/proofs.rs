//! Storage-proof challenges and merkle verification.
//!
//! Files are committed to as a merkle tree over fixed-size segments. The
//! challenged segment index is derived from the id of the canonical block at
//! the contract's window start, so it is unpredictable until the window opens
//! yet identical on every node replaying the same path.
//!
//! The tree shape follows the certificate-transparency construction: a tree
//! over `n` leaves splits at the largest power of two strictly less than `n`,
//! which keeps audit paths well defined for non-power-of-two leaf counts.

use silo_types::{hash_all, BlockId, FileContractId, Hash256, SEGMENT_SIZE};

/// One file segment, the unit of storage proofs.
pub type MerkleLeaf = [u8; SEGMENT_SIZE];

/// The challenged segment index for a contract.
///
/// `seed` is the id of the canonical block at the contract's window start;
/// `segment_count` must be nonzero.
pub fn segment_index(seed: &BlockId, contract_id: &FileContractId, segment_count: u64) -> u64 {
    let digest = hash_all(&[b"proof-challenge", seed.as_ref(), contract_id.as_ref()]);
    digest.to_u64() % segment_count
}

fn leaf_hash(segment: &MerkleLeaf) -> Hash256 {
    hash_all(&[&[0x00], segment])
}

fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    hash_all(&[&[0x01], left.as_ref(), right.as_ref()])
}

/// Largest power of two strictly less than `n`. Requires `n > 1`.
fn split_point(n: u64) -> u64 {
    let mut k = 1u64;
    while k * 2 < n {
        k *= 2;
    }
    k
}

/// Merkle root over the given segments. An empty file is represented by a
/// single zero-filled segment.
pub fn merkle_root(leaves: &[MerkleLeaf]) -> Hash256 {
    if leaves.is_empty() {
        return leaf_hash(&[0u8; SEGMENT_SIZE]);
    }
    subtree_root(leaves)
}

fn subtree_root(leaves: &[MerkleLeaf]) -> Hash256 {
    if leaves.len() == 1 {
        return leaf_hash(&leaves[0]);
    }
    let k = split_point(leaves.len() as u64) as usize;
    node_hash(&subtree_root(&leaves[..k]), &subtree_root(&leaves[k..]))
}

/// Audit path for the leaf at `index`, ordered leaf side to root side.
pub fn audit_path(leaves: &[MerkleLeaf], index: u64) -> Vec<Hash256> {
    let mut path = Vec::new();
    collect_path(leaves, index, &mut path);
    path
}

fn collect_path(leaves: &[MerkleLeaf], index: u64, path: &mut Vec<Hash256>) {
    if leaves.len() <= 1 {
        return;
    }
    let k = split_point(leaves.len() as u64);
    if index < k {
        collect_path(&leaves[..k as usize], index, path);
        path.push(subtree_root(&leaves[k as usize..]));
    } else {
        collect_path(&leaves[k as usize..], index - k, path);
        path.push(subtree_root(&leaves[..k as usize]));
    }
}

/// Verify that `segment` sits at `index` in a tree of `segment_count` leaves
/// with the given merkle root, using the audit path from the proof.
pub fn verify_segment(
    root: &Hash256,
    segment: &MerkleLeaf,
    index: u64,
    segment_count: u64,
    path: &[Hash256],
) -> bool {
    if segment_count == 0 || index >= segment_count {
        return false;
    }
    let mut remaining = path.iter();
    match climb(index, segment_count, leaf_hash(segment), &mut remaining) {
        Some(computed) => remaining.next().is_none() && computed == *root,
        None => false,
    }
}

fn climb<'a>(
    index: u64,
    count: u64,
    leaf: Hash256,
    path: &mut impl Iterator<Item = &'a Hash256>,
) -> Option<Hash256> {
    if count == 1 {
        return Some(leaf);
    }
    let k = split_point(count);
    if index < k {
        let left = climb(index, k, leaf, path)?;
        let right = path.next()?;
        Some(node_hash(&left, right))
    } else {
        let right = climb(index - k, count - k, leaf, path)?;
        let left = path.next()?;
        Some(node_hash(left, &right))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<MerkleLeaf> {
        (0..n)
            .map(|i| {
                let mut leaf = [0u8; SEGMENT_SIZE];
                leaf[0] = i as u8;
                leaf
            })
            .collect()
    }

    #[test]
    fn audit_paths_verify_for_every_leaf() {
        for n in [1usize, 2, 3, 5, 8, 13] {
            let leaves = leaves(n);
            let root = merkle_root(&leaves);
            for i in 0..n as u64 {
                let path = audit_path(&leaves, i);
                assert!(
                    verify_segment(&root, &leaves[i as usize], i, n as u64, &path),
                    "leaf {} of {} failed",
                    i,
                    n
                );
            }
        }
    }

    #[test]
    fn wrong_segment_fails() {
        let leaves = leaves(5);
        let root = merkle_root(&leaves);
        let path = audit_path(&leaves, 2);
        let mut tampered = leaves[2];
        tampered[0] ^= 1;
        assert!(!verify_segment(&root, &tampered, 2, 5, &path));
    }

    #[test]
    fn wrong_index_fails() {
        let leaves = leaves(5);
        let root = merkle_root(&leaves);
        let path = audit_path(&leaves, 2);
        assert!(!verify_segment(&root, &leaves[2], 3, 5, &path));
        assert!(!verify_segment(&root, &leaves[2], 7, 5, &path));
    }

    #[test]
    fn truncated_and_padded_paths_fail() {
        let leaves = leaves(8);
        let root = merkle_root(&leaves);
        let path = audit_path(&leaves, 4);
        assert!(!verify_segment(&root, &leaves[4], 4, 8, &path[..path.len() - 1]));
        let mut padded = path.clone();
        padded.push(Hash256([9; 32]));
        assert!(!verify_segment(&root, &leaves[4], 4, 8, &padded));
    }

    #[test]
    fn challenge_index_is_deterministic_and_bounded() {
        let seed = BlockId::from_bytes([1; 32]);
        let id = FileContractId::from_bytes([2; 32]);
        let index = segment_index(&seed, &id, 10);
        assert_eq!(index, segment_index(&seed, &id, 10));
        assert!(index < 10);
        // A different seed block yields a different challenge in general.
        let other_seed = BlockId::from_bytes([3; 32]);
        let _ = segment_index(&other_seed, &id, 10);
    }
}
