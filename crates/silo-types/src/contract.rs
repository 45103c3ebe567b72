//! File contracts, revisions, and storage proofs.

use crate::{
    hash_all, CodecError, CoinOutput, CoinOutputId, Currency, Decoder, Encoder, FileContractId,
    Hash256, Signature, UnlockConditions, UnlockHash,
};

/// Size in bytes of one storage-proof segment (merkle leaf).
pub const SEGMENT_SIZE: usize = 64;

/// An on-chain storage agreement.
///
/// The host must prove possession of the file during the window
/// `[window_start, window_end)`. A successful proof pays
/// `valid_proof_outputs`; expiry without a proof pays `missed_proof_outputs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContract {
    /// Size of the stored file in bytes.
    pub file_size: u64,
    /// Merkle root over the file's segments.
    pub file_merkle_root: Hash256,
    /// First height at which a storage proof is accepted.
    pub window_start: u64,
    /// Height at which the contract expires unproven.
    pub window_end: u64,
    /// Total value committed to the contract.
    pub payout: Currency,
    /// Paid out (delayed) when a valid proof is submitted.
    pub valid_proof_outputs: Vec<CoinOutput>,
    /// Paid out (delayed) when the window expires without a proof.
    pub missed_proof_outputs: Vec<CoinOutput>,
    /// Commitment to the conditions authorizing revisions.
    pub unlock_hash: UnlockHash,
    /// Monotonically increasing revision counter.
    pub revision_number: u64,
}

impl FileContract {
    /// Number of merkle leaves in the stored file.
    pub fn segment_count(&self) -> u64 {
        self.file_size.div_ceil(SEGMENT_SIZE as u64).max(1)
    }

    pub fn encode(&self, enc: &mut Encoder) {
        enc.write_u64(self.file_size);
        enc.write_hash(&self.file_merkle_root.0);
        enc.write_u64(self.window_start);
        enc.write_u64(self.window_end);
        enc.write_currency(self.payout);
        encode_outputs(enc, &self.valid_proof_outputs);
        encode_outputs(enc, &self.missed_proof_outputs);
        enc.write_hash(self.unlock_hash.as_bytes());
        enc.write_u64(self.revision_number);
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            file_size: dec.read_u64()?,
            file_merkle_root: Hash256(dec.read_hash()?),
            window_start: dec.read_u64()?,
            window_end: dec.read_u64()?,
            payout: dec.read_currency()?,
            valid_proof_outputs: decode_outputs(dec)?,
            missed_proof_outputs: decode_outputs(dec)?,
            unlock_hash: UnlockHash(Hash256(dec.read_hash()?)),
            revision_number: dec.read_u64()?,
        })
    }

    /// Standalone encoding, used as a storage table value.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode(&mut enc);
        enc.into_bytes()
    }

    /// Decode a standalone encoding, rejecting trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut dec = Decoder::new(bytes);
        let contract = Self::decode(&mut dec)?;
        dec.finish()?;
        Ok(contract)
    }
}

impl FileContractId {
    /// Id of the payout output at `index` created when the contract resolves.
    ///
    /// `valid` selects between the valid-proof and missed-proof alternative.
    pub fn proof_output_id(&self, valid: bool, index: u64) -> CoinOutputId {
        CoinOutputId(hash_all(&[
            b"storage-proof-output",
            self.as_ref(),
            &[valid as u8],
            &index.to_be_bytes(),
        ]))
    }
}

/// A renegotiation of an open file contract.
///
/// Authorized against the contract's `unlock_hash`; must carry a strictly
/// higher revision number and be submitted before the proof window opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContractRevision {
    /// Contract being revised.
    pub parent_id: FileContractId,
    /// Conditions matching the contract's unlock hash.
    pub unlock_conditions: UnlockConditions,
    /// Signatures satisfying the unlock conditions.
    pub signatures: Vec<Signature>,
    pub new_revision_number: u64,
    pub new_file_size: u64,
    pub new_file_merkle_root: Hash256,
    pub new_window_start: u64,
    pub new_window_end: u64,
    pub new_valid_proof_outputs: Vec<CoinOutput>,
    pub new_missed_proof_outputs: Vec<CoinOutput>,
    pub new_unlock_hash: UnlockHash,
}

impl FileContractRevision {
    /// The contract this revision rewrites the open contract into.
    ///
    /// Payout and tax were fixed at contract formation and cannot be revised.
    pub fn revised_contract(&self, original: &FileContract) -> FileContract {
        FileContract {
            file_size: self.new_file_size,
            file_merkle_root: self.new_file_merkle_root,
            window_start: self.new_window_start,
            window_end: self.new_window_end,
            payout: original.payout,
            valid_proof_outputs: self.new_valid_proof_outputs.clone(),
            missed_proof_outputs: self.new_missed_proof_outputs.clone(),
            unlock_hash: self.new_unlock_hash,
            revision_number: self.new_revision_number,
        }
    }

    pub fn encode(&self, enc: &mut Encoder) {
        self.encode_fields(enc, true);
    }

    /// Encoding with signatures optionally omitted (signature-hash input).
    pub(crate) fn encode_fields(&self, enc: &mut Encoder, with_signatures: bool) {
        enc.write_hash(self.parent_id.as_bytes());
        self.unlock_conditions.encode(enc);
        if with_signatures {
            enc.write_len(self.signatures.len());
            for sig in &self.signatures {
                enc.write_var_bytes(sig);
            }
        }
        enc.write_u64(self.new_revision_number);
        enc.write_u64(self.new_file_size);
        enc.write_hash(&self.new_file_merkle_root.0);
        enc.write_u64(self.new_window_start);
        enc.write_u64(self.new_window_end);
        encode_outputs(enc, &self.new_valid_proof_outputs);
        encode_outputs(enc, &self.new_missed_proof_outputs);
        enc.write_hash(self.new_unlock_hash.as_bytes());
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let parent_id = FileContractId(Hash256(dec.read_hash()?));
        let unlock_conditions = UnlockConditions::decode(dec)?;
        let sig_count = dec.read_len()?;
        let mut signatures = Vec::with_capacity(sig_count);
        for _ in 0..sig_count {
            signatures.push(dec.read_var_bytes()?);
        }
        Ok(Self {
            parent_id,
            unlock_conditions,
            signatures,
            new_revision_number: dec.read_u64()?,
            new_file_size: dec.read_u64()?,
            new_file_merkle_root: Hash256(dec.read_hash()?),
            new_window_start: dec.read_u64()?,
            new_window_end: dec.read_u64()?,
            new_valid_proof_outputs: decode_outputs(dec)?,
            new_missed_proof_outputs: decode_outputs(dec)?,
            new_unlock_hash: UnlockHash(Hash256(dec.read_hash()?)),
        })
    }
}

/// Proof that the host holds the challenged segment of a contract's file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageProof {
    /// Contract being proven.
    pub parent_id: FileContractId,
    /// The challenged segment's raw bytes.
    pub segment: [u8; SEGMENT_SIZE],
    /// Audit path from the segment to the file merkle root.
    pub hash_set: Vec<Hash256>,
}

impl StorageProof {
    pub fn encode(&self, enc: &mut Encoder) {
        enc.write_hash(self.parent_id.as_bytes());
        enc.write_fixed(&self.segment);
        enc.write_len(self.hash_set.len());
        for hash in &self.hash_set {
            enc.write_hash(&hash.0);
        }
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let parent_id = FileContractId(Hash256(dec.read_hash()?));
        let mut segment = [0u8; SEGMENT_SIZE];
        dec.read_fixed(&mut segment)?;
        let count = dec.read_len()?;
        let mut hash_set = Vec::with_capacity(count);
        for _ in 0..count {
            hash_set.push(Hash256(dec.read_hash()?));
        }
        Ok(Self {
            parent_id,
            segment,
            hash_set,
        })
    }
}

fn encode_outputs(enc: &mut Encoder, outputs: &[CoinOutput]) {
    enc.write_len(outputs.len());
    for output in outputs {
        output.encode(enc);
    }
}

fn decode_outputs(dec: &mut Decoder<'_>) -> Result<Vec<CoinOutput>, CodecError> {
    let count = dec.read_len()?;
    let mut outputs = Vec::with_capacity(count);
    for _ in 0..count {
        outputs.push(CoinOutput::decode(dec)?);
    }
    Ok(outputs)
}
