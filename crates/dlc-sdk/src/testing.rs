//! Mock collaborators and fixtures for exercising the contract lifecycle
//! without a wallet, signer or network.

use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};
use sha2::{Digest, Sha256};

use crate::chain::{BroadcastService, InputSelector};
use crate::clock::Clock;
use crate::contract::Contract;
use crate::error::{Error, Result};
use crate::oracle::PriceSource;
use crate::params::{
    Amount, ContractId, ContractTerms, Oracle, Participant, ParticipantId, Price, SATS_PER_BTC,
};
use crate::signing::SigningService;
use crate::store_trait::ContractPersistence;
use crate::transaction::{
    BitcoinInput, BroadcastAck, SerializedTx, SigningArtifact, Transaction, TxId, WitnessUtxo,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn alice() -> Participant {
    Participant {
        id: ParticipantId::new("1"),
        name: "Alice".into(),
        public_key: "02abc...123".into(),
        balance: SATS_PER_BTC + SATS_PER_BTC / 2,
    }
}

pub fn bob() -> Participant {
    Participant {
        id: ParticipantId::new("2"),
        name: "Bob".into(),
        public_key: "03def...456".into(),
        balance: 2 * SATS_PER_BTC,
    }
}

pub fn price_oracle() -> Oracle {
    Oracle {
        name: "Price Oracle".into(),
        public_key: "02xyz...789".into(),
    }
}

/// Winner-takes-all at $30,000 ± $100 with 0.1 BTC from each side.
pub fn test_terms() -> ContractTerms {
    ContractTerms::winner_takes_all(
        Price::from_dollars(30_000),
        SATS_PER_BTC / 10,
        Price::from_dollars(100),
    )
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::at(start)
    }
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        ManualClock::now(self)
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Hands out one synthetic input per request, locking exactly the requested
/// amount unless `amount_override` says otherwise.
#[derive(Debug, Default)]
pub struct FixedInputSelector {
    pub amount_override: Option<Amount>,
}

impl InputSelector for FixedInputSelector {
    fn select_input(&self, owner: &Participant, amount: Amount) -> Result<BitcoinInput> {
        if owner.balance < amount {
            return Err(Error::InputSelection(format!(
                "{} holds {} sats, needs {amount}",
                owner.id, owner.balance
            )));
        }
        let amount = self.amount_override.unwrap_or(amount);
        let txid = hex::encode(Sha256::digest(owner.id.as_str().as_bytes()));
        Ok(BitcoinInput {
            txid,
            vout: 0,
            amount,
            witness_utxo: WitnessUtxo {
                script: vec![0x00, 0x14],
                amount,
            },
            owner: owner.id.clone(),
            owner_pubkey: owner.public_key.clone(),
        })
    }
}

/// Signs by hashing the participant and transaction ids.
#[derive(Debug, Default)]
pub struct MockSigner;

impl SigningService for MockSigner {
    fn sign(&self, participant: &ParticipantId, tx_id: &TxId) -> Result<SigningArtifact> {
        let mut hasher = Sha256::new();
        hasher.update(participant.as_str().as_bytes());
        hasher.update(tx_id.0);
        Ok(SigningArtifact(hasher.finalize().to_vec()))
    }

    fn finalize(&self, tx: &Transaction) -> Result<SerializedTx> {
        let mut bytes = tx.id.0.to_vec();
        for sig in &tx.signatures {
            let artifact = sig
                .artifact
                .as_ref()
                .ok_or_else(|| Error::Signer(format!("{} has not signed", sig.participant_id)))?;
            bytes.extend_from_slice(&artifact.0);
        }
        Ok(SerializedTx(bytes))
    }
}

/// Records every transaction it is asked to broadcast.
#[derive(Debug, Default)]
pub struct MockBroadcaster {
    sent: Mutex<Vec<SerializedTx>>,
    fail_next: Mutex<bool>,
}

impl MockBroadcaster {
    pub fn sent(&self) -> Vec<SerializedTx> {
        self.sent.lock().unwrap().clone()
    }

    /// Make the next broadcast fail.
    pub fn fail_next(&self) {
        *self.fail_next.lock().unwrap() = true;
    }
}

impl BroadcastService for MockBroadcaster {
    fn broadcast(&self, tx: &SerializedTx) -> Result<BroadcastAck> {
        let mut fail = self
            .fail_next
            .lock()
            .map_err(|_| Error::Broadcast("poisoned".into()))?;
        if std::mem::take(&mut *fail) {
            return Err(Error::Broadcast("mempool rejected transaction".into()));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| Error::Broadcast("poisoned".into()))?;
        sent.push(tx.clone());
        Ok(BroadcastAck {
            reference: format!("mock-{}", sent.len()),
        })
    }
}

/// Price source whose price is set by the test.
#[derive(Debug)]
pub struct FixedPriceSource {
    price: Mutex<Option<Price>>,
}

impl FixedPriceSource {
    pub fn new(price: Price) -> Self {
        Self {
            price: Mutex::new(Some(price)),
        }
    }

    pub fn set(&self, price: Price) {
        *self.price.lock().unwrap() = Some(price);
    }

    /// Make every read fail until the next [`set`](Self::set).
    pub fn go_offline(&self) {
        *self.price.lock().unwrap() = None;
    }
}

impl PriceSource for FixedPriceSource {
    fn current_price(&self) -> Result<Price> {
        self.price
            .lock()
            .map_err(|_| Error::PriceFeed("poisoned".into()))?
            .ok_or_else(|| Error::PriceFeed("source offline".into()))
    }
}

// ---------------------------------------------------------------------------
// In-memory persistence for tests
// ---------------------------------------------------------------------------

/// Minimal in-memory store implementing `ContractPersistence`.
///
/// Keeps contracts in insertion order and replaces by id. Setting
/// `fail_writes` makes every save and remove fail.
#[derive(Debug, Default)]
pub struct TestStore {
    pub contracts: Vec<Contract>,
    pub fail_writes: bool,
}

impl ContractPersistence for TestStore {
    fn save_contract(&mut self, contract: &Contract) -> std::result::Result<(), String> {
        if self.fail_writes {
            return Err("disk full".into());
        }
        match self.contracts.iter_mut().find(|c| c.id == contract.id) {
            Some(existing) => *existing = contract.clone(),
            None => self.contracts.push(contract.clone()),
        }
        Ok(())
    }

    fn remove_contract(&mut self, id: &ContractId) -> std::result::Result<(), String> {
        if self.fail_writes {
            return Err("disk full".into());
        }
        self.contracts.retain(|c| &c.id != id);
        Ok(())
    }

    fn load_contracts(&mut self) -> std::result::Result<Vec<Contract>, String> {
        Ok(self.contracts.clone())
    }
}
