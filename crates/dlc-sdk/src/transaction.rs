use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::params::{Amount, ContractId, ParticipantId};
use crate::state::TransactionStatus;

/// SHA256(contract_id || funding outpoints) identifies the joint funding transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub [u8; 32]);

impl TxId {
    pub(crate) fn derive(contract_id: &ContractId, inputs: &[BitcoinInput]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(contract_id.as_bytes());
        for input in inputs {
            hasher.update(input.txid.as_bytes());
            hasher.update(input.vout.to_be_bytes());
            hasher.update(input.amount.to_be_bytes());
        }
        TxId(hasher.finalize().into())
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Output being spent, as required for signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessUtxo {
    #[serde(with = "hex_bytes")]
    pub script: Vec<u8>,
    pub amount: Amount,
}

/// A collateral-locking input supplied by an [`InputSelector`](crate::chain::InputSelector).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinInput {
    /// Funding txid, opaque to the core.
    pub txid: String,
    pub vout: u32,
    pub amount: Amount,
    pub witness_utxo: WitnessUtxo,
    pub owner: ParticipantId,
    pub owner_pubkey: String,
}

/// Opaque per-participant signing output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningArtifact(#[serde(with = "hex_bytes")] pub Vec<u8>);

/// Finalized transaction produced once both participants have signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedTx(#[serde(with = "hex_bytes")] pub Vec<u8>);

/// Acknowledgement returned by a [`BroadcastService`](crate::chain::BroadcastService).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastAck {
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub participant_id: ParticipantId,
    pub signed: bool,
    /// Present only once `signed` is true.
    pub artifact: Option<SigningArtifact>,
}

impl Signature {
    fn unsigned(participant_id: ParticipantId) -> Self {
        Self {
            participant_id,
            signed: false,
            artifact: None,
        }
    }
}

/// The 2-of-2 funding transaction owned by a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub inputs: Vec<BitcoinInput>,
    pub signatures: [Signature; 2],
    pub status: TransactionStatus,
    pub broadcast_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub finalized: Option<SerializedTx>,
}

impl Transaction {
    pub(crate) fn new(
        contract_id: &ContractId,
        inputs: Vec<BitcoinInput>,
        participant1: ParticipantId,
        participant2: ParticipantId,
    ) -> Self {
        Self {
            id: TxId::derive(contract_id, &inputs),
            inputs,
            signatures: [
                Signature::unsigned(participant1),
                Signature::unsigned(participant2),
            ],
            status: TransactionStatus::PendingSignatures,
            broadcast_at: None,
            confirmed_at: None,
            finalized: None,
        }
    }

    pub fn signature(&self, participant: &ParticipantId) -> Option<&Signature> {
        self.signatures
            .iter()
            .find(|s| &s.participant_id == participant)
    }

    pub(crate) fn signature_mut(&mut self, participant: &ParticipantId) -> Option<&mut Signature> {
        self.signatures
            .iter_mut()
            .find(|s| &s.participant_id == participant)
    }

    pub fn all_signed(&self) -> bool {
        self.signatures.iter().all(|s| s.signed)
    }

    pub fn signed_count(&self) -> usize {
        self.signatures.iter().filter(|s| s.signed).count()
    }

    pub fn total_input(&self) -> Amount {
        self.inputs.iter().map(|i| i.amount).sum()
    }

    /// Sum of inputs owned by `owner`.
    pub fn input_from(&self, owner: &ParticipantId) -> Amount {
        self.inputs
            .iter()
            .filter(|i| &i.owner == owner)
            .map(|i| i.amount)
            .sum()
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
