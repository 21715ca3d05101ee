use chrono::{DateTime, Utc};
use serde::Serialize;

use dlc_sdk::{Contract, Oracle, Participant, PriceObservation, Transaction};

// ============================================================================
// Views sent to the client
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub id: String,
    pub name: String,
    pub public_key: String,
    pub balance_sats: u64,
}

impl From<&Participant> for ParticipantView {
    fn from(p: &Participant) -> Self {
        Self {
            id: p.id.as_str().to_string(),
            name: p.name.clone(),
            public_key: p.public_key.clone(),
            balance_sats: p.balance,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleView {
    pub name: String,
    pub public_key: String,
}

impl From<&Oracle> for OracleView {
    fn from(o: &Oracle) -> Self {
        Self {
            name: o.name.clone(),
            public_key: o.public_key.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermsView {
    pub target_price_cents: u64,
    pub collateral_sats: u64,
    pub outcome1_payout_sats: u64,
    pub outcome2_payout_sats: u64,
    pub price_threshold_cents: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureView {
    pub participant_id: String,
    pub signed: bool,
    /// Hex signing artifact, once signed.
    pub artifact: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub id: String,
    pub status: &'static str,
    pub signatures: Vec<SignatureView>,
    pub total_input_sats: u64,
    pub broadcast_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Hex of the finalized transaction, once both have signed.
    pub serialized_tx: Option<String>,
}

impl From<&Transaction> for TransactionView {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.to_string(),
            status: tx.status.as_str(),
            signatures: tx
                .signatures
                .iter()
                .map(|s| SignatureView {
                    participant_id: s.participant_id.as_str().to_string(),
                    signed: s.signed,
                    artifact: s.artifact.as_ref().map(|a| hex::encode(&a.0)),
                })
                .collect(),
            total_input_sats: tx.total_input(),
            broadcast_at: tx.broadcast_at,
            confirmed_at: tx.confirmed_at,
            serialized_tx: tx.finalized.as_ref().map(|f| hex::encode(&f.0)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutView {
    pub participant1_sats: u64,
    pub participant2_sats: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractView {
    pub id: String,
    /// Expiry-aware status.
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub participant1: ParticipantView,
    pub participant2: ParticipantView,
    pub oracle: OracleView,
    pub terms: TermsView,
    pub current_price_cents: u64,
    pub transaction: Option<TransactionView>,
    /// Participant id of the winner.
    pub winner: Option<String>,
    pub final_payout: Option<PayoutView>,
}

impl ContractView {
    pub fn new(contract: &Contract, now: DateTime<Utc>) -> Self {
        Self {
            id: contract.id.to_string(),
            status: contract.effective_status(now).as_str(),
            created_at: contract.created_at,
            expires_at: contract.expires_at,
            executed_at: contract.executed_at,
            participant1: (&contract.participant1).into(),
            participant2: (&contract.participant2).into(),
            oracle: (&contract.oracle).into(),
            terms: TermsView {
                target_price_cents: contract.terms.target_price.cents(),
                collateral_sats: contract.terms.collateral,
                outcome1_payout_sats: contract.terms.outcome1_payout,
                outcome2_payout_sats: contract.terms.outcome2_payout,
                price_threshold_cents: contract.terms.price_threshold.cents(),
            },
            current_price_cents: contract.current_price.cents(),
            transaction: contract.transaction.as_ref().map(TransactionView::from),
            winner: contract
                .winner_participant()
                .map(|p| p.id.as_str().to_string()),
            final_payout: contract.final_payout.map(|p| PayoutView {
                participant1_sats: p.participant1_amount,
                participant2_sats: p.participant2_amount,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceView {
    pub cents: u64,
    pub display: String,
    pub observed_at: DateTime<Utc>,
}

impl From<&PriceObservation> for PriceView {
    fn from(obs: &PriceObservation) -> Self {
        Self {
            cents: obs.price.cents(),
            display: obs.price.to_string(),
            observed_at: obs.observed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    pub revision: u64,
    pub oracle_price: Option<PriceView>,
    pub contracts: Vec<ContractView>,
}
