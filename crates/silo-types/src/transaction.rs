//! Transactions and derived output identifiers.

use crate::{
    hash_all, CodecError, CoinOutput, CoinOutputId, Currency, Decoder, Encoder, FileContract,
    FileContractId, FileContractRevision, Hash256, SiafundOutput, SiafundOutputId, Signature,
    StorageProof, TransactionId, UnlockConditions, UnlockHash,
};

/// Spends an existing coin output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinInput {
    /// The output being spent.
    pub parent_id: CoinOutputId,
    /// Conditions matching the output's unlock hash.
    pub unlock_conditions: UnlockConditions,
    /// Signatures satisfying the unlock conditions.
    pub signatures: Vec<Signature>,
}

/// Spends an existing siafund output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiafundInput {
    /// The output being spent.
    pub parent_id: SiafundOutputId,
    /// Conditions matching the output's unlock hash.
    pub unlock_conditions: UnlockConditions,
    /// Signatures satisfying the unlock conditions.
    pub signatures: Vec<Signature>,
    /// Destination of the accrued pool claim.
    pub claim_unlock_hash: UnlockHash,
}

/// A transfer of coins, siafunds, and file-contract state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    pub coin_inputs: Vec<CoinInput>,
    pub coin_outputs: Vec<CoinOutput>,
    pub file_contracts: Vec<FileContract>,
    pub file_contract_revisions: Vec<FileContractRevision>,
    pub storage_proofs: Vec<StorageProof>,
    pub siafund_inputs: Vec<SiafundInput>,
    pub siafund_outputs: Vec<SiafundOutput>,
    pub miner_fees: Vec<Currency>,
}

impl Transaction {
    /// Content hash identifying the transaction.
    pub fn id(&self) -> TransactionId {
        TransactionId(hash_all(&[b"transaction", &self.to_bytes()]))
    }

    /// Hash covered by input signatures: the encoding with signatures
    /// stripped, so signing is not self-referential.
    pub fn sig_hash(&self) -> Hash256 {
        let mut enc = Encoder::new();
        self.encode_fields(&mut enc, false);
        hash_all(&[b"transaction-sig", &enc.into_bytes()])
    }

    /// Id of the coin output created at `index`.
    pub fn coin_output_id(&self, index: u64) -> CoinOutputId {
        CoinOutputId(hash_all(&[
            b"coin-output",
            self.id().as_ref(),
            &index.to_be_bytes(),
        ]))
    }

    /// Id of the siafund output created at `index`.
    pub fn siafund_output_id(&self, index: u64) -> SiafundOutputId {
        SiafundOutputId(hash_all(&[
            b"siafund-output",
            self.id().as_ref(),
            &index.to_be_bytes(),
        ]))
    }

    /// Id of the file contract created at `index`.
    pub fn file_contract_id(&self, index: u64) -> FileContractId {
        FileContractId(hash_all(&[
            b"file-contract",
            self.id().as_ref(),
            &index.to_be_bytes(),
        ]))
    }

    pub fn encode(&self, enc: &mut Encoder) {
        self.encode_fields(enc, true);
    }

    fn encode_fields(&self, enc: &mut Encoder, with_signatures: bool) {
        enc.write_len(self.coin_inputs.len());
        for input in &self.coin_inputs {
            enc.write_hash(input.parent_id.as_bytes());
            input.unlock_conditions.encode(enc);
            if with_signatures {
                encode_signatures(enc, &input.signatures);
            }
        }
        enc.write_len(self.coin_outputs.len());
        for output in &self.coin_outputs {
            output.encode(enc);
        }
        enc.write_len(self.file_contracts.len());
        for contract in &self.file_contracts {
            contract.encode(enc);
        }
        enc.write_len(self.file_contract_revisions.len());
        for revision in &self.file_contract_revisions {
            revision.encode_fields(enc, with_signatures);
        }
        enc.write_len(self.storage_proofs.len());
        for proof in &self.storage_proofs {
            proof.encode(enc);
        }
        enc.write_len(self.siafund_inputs.len());
        for input in &self.siafund_inputs {
            enc.write_hash(input.parent_id.as_bytes());
            input.unlock_conditions.encode(enc);
            if with_signatures {
                encode_signatures(enc, &input.signatures);
            }
            enc.write_hash(input.claim_unlock_hash.as_bytes());
        }
        enc.write_len(self.siafund_outputs.len());
        for output in &self.siafund_outputs {
            output.encode(enc);
        }
        enc.write_len(self.miner_fees.len());
        for fee in &self.miner_fees {
            enc.write_currency(*fee);
        }
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let coin_input_count = dec.read_len()?;
        let mut coin_inputs = Vec::with_capacity(coin_input_count);
        for _ in 0..coin_input_count {
            coin_inputs.push(CoinInput {
                parent_id: CoinOutputId(Hash256(dec.read_hash()?)),
                unlock_conditions: UnlockConditions::decode(dec)?,
                signatures: decode_signatures(dec)?,
            });
        }

        let coin_output_count = dec.read_len()?;
        let mut coin_outputs = Vec::with_capacity(coin_output_count);
        for _ in 0..coin_output_count {
            coin_outputs.push(CoinOutput::decode(dec)?);
        }

        let contract_count = dec.read_len()?;
        let mut file_contracts = Vec::with_capacity(contract_count);
        for _ in 0..contract_count {
            file_contracts.push(FileContract::decode(dec)?);
        }

        let revision_count = dec.read_len()?;
        let mut file_contract_revisions = Vec::with_capacity(revision_count);
        for _ in 0..revision_count {
            file_contract_revisions.push(FileContractRevision::decode(dec)?);
        }

        let proof_count = dec.read_len()?;
        let mut storage_proofs = Vec::with_capacity(proof_count);
        for _ in 0..proof_count {
            storage_proofs.push(StorageProof::decode(dec)?);
        }

        let siafund_input_count = dec.read_len()?;
        let mut siafund_inputs = Vec::with_capacity(siafund_input_count);
        for _ in 0..siafund_input_count {
            siafund_inputs.push(SiafundInput {
                parent_id: SiafundOutputId(Hash256(dec.read_hash()?)),
                unlock_conditions: UnlockConditions::decode(dec)?,
                signatures: decode_signatures(dec)?,
                claim_unlock_hash: UnlockHash(Hash256(dec.read_hash()?)),
            });
        }

        let siafund_output_count = dec.read_len()?;
        let mut siafund_outputs = Vec::with_capacity(siafund_output_count);
        for _ in 0..siafund_output_count {
            siafund_outputs.push(SiafundOutput::decode(dec)?);
        }

        let fee_count = dec.read_len()?;
        let mut miner_fees = Vec::with_capacity(fee_count);
        for _ in 0..fee_count {
            miner_fees.push(dec.read_currency()?);
        }

        Ok(Self {
            coin_inputs,
            coin_outputs,
            file_contracts,
            file_contract_revisions,
            storage_proofs,
            siafund_inputs,
            siafund_outputs,
            miner_fees,
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
        let tx = Self::decode(&mut dec)?;
        dec.finish()?;
        Ok(tx)
    }
}

impl SiafundOutputId {
    /// Id of the delayed coin output paying out this output's pool claim.
    pub fn claim_output_id(&self) -> CoinOutputId {
        CoinOutputId(hash_all(&[b"siafund-claim", self.as_ref()]))
    }
}

fn encode_signatures(enc: &mut Encoder, signatures: &[Signature]) {
    enc.write_len(signatures.len());
    for sig in signatures {
        enc.write_var_bytes(sig);
    }
}

fn decode_signatures(dec: &mut Decoder<'_>) -> Result<Vec<Signature>, CodecError> {
    let count = dec.read_len()?;
    let mut signatures = Vec::with_capacity(count);
    for _ in 0..count {
        signatures.push(dec.read_var_bytes()?);
    }
    Ok(signatures)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            coin_inputs: vec![CoinInput {
                parent_id: CoinOutputId::from_bytes([1; 32]),
                unlock_conditions: UnlockConditions {
                    timelock: 0,
                    public_keys: vec![vec![0xAA]],
                    signatures_required: 1,
                },
                signatures: vec![vec![0xBB, 0xCC]],
            }],
            coin_outputs: vec![CoinOutput {
                value: Currency::from(90u64),
                unlock_hash: UnlockHash::from_bytes([2; 32]),
            }],
            miner_fees: vec![Currency::from(10u64)],
            ..Default::default()
        }
    }

    #[test]
    fn round_trip() {
        let tx = sample_tx();
        assert_eq!(Transaction::from_bytes(&tx.to_bytes()).unwrap(), tx);
    }

    #[test]
    fn id_changes_with_content() {
        let tx = sample_tx();
        let mut other = tx.clone();
        other.miner_fees[0] = Currency::from(11u64);
        assert_ne!(tx.id(), other.id());
    }

    #[test]
    fn sig_hash_ignores_signatures() {
        let tx = sample_tx();
        let mut signed_differently = tx.clone();
        signed_differently.coin_inputs[0].signatures = vec![vec![0xFF]];
        assert_eq!(tx.sig_hash(), signed_differently.sig_hash());
        // But the transaction id covers them.
        assert_ne!(tx.id(), signed_differently.id());
    }

    #[test]
    fn derived_ids_are_distinct() {
        let tx = sample_tx();
        assert_ne!(tx.coin_output_id(0), tx.coin_output_id(1));
        assert_ne!(
            tx.coin_output_id(0).as_bytes(),
            tx.siafund_output_id(0).as_bytes()
        );
    }
}
