use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Satoshi amount.
pub type Amount = u64;

/// Satoshis per whole bitcoin.
pub const SATS_PER_BTC: Amount = 100_000_000;

/// Oracle price in US-dollar cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Price(pub u64);

impl Price {
    pub const ZERO: Price = Price(0);

    /// Whole dollars to cents, saturating at `u64::MAX`.
    pub fn from_dollars(dollars: u64) -> Self {
        Price(dollars.saturating_mul(100))
    }

    pub fn cents(self) -> u64 {
        self.0
    }

    /// Absolute distance between two prices.
    pub fn abs_diff(self, other: Price) -> Price {
        Price(self.0.abs_diff(other.0))
    }

    /// Move the price by `delta` cents, saturating at zero.
    pub fn offset(self, delta: i64) -> Price {
        Price(self.0.saturating_add_signed(delta))
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Opaque participant identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        ParticipantId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A party to a contract. Cloned into each contract it is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    /// Public-key handle. Not validated.
    pub public_key: String,
    /// Spendable collateral balance in satoshis.
    pub balance: Amount,
}

/// The price attester a contract settles against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Oracle {
    pub name: String,
    pub public_key: String,
}

/// SHA256(creation parameters || sequence), unique per contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContractId(pub [u8; 32]);

impl ContractId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidId(format!("{s}: {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidId(format!("{s}: expected 32 bytes")))?;
        Ok(ContractId(arr))
    }

    /// Derive the id of a new contract from everything that defines it.
    pub(crate) fn derive(
        terms: &ContractTerms,
        participant1: &ParticipantId,
        participant2: &ParticipantId,
        oracle: &Oracle,
        created_at_millis: i64,
        sequence: u64,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(participant1.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(participant2.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(oracle.public_key.as_bytes());
        hasher.update(terms.target_price.0.to_be_bytes());
        hasher.update(terms.collateral.to_be_bytes());
        hasher.update(terms.outcome1_payout.to_be_bytes());
        hasher.update(terms.outcome2_payout.to_be_bytes());
        hasher.update(terms.price_threshold.0.to_be_bytes());
        hasher.update(created_at_millis.to_be_bytes());
        hasher.update(sequence.to_be_bytes());
        ContractId(hasher.finalize().into())
    }
}

impl std::fmt::Display for ContractId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl AsRef<[u8]> for ContractId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::str::FromStr for ContractId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ContractId::from_hex(s)
    }
}

/// Economic terms of a contract. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractTerms {
    pub target_price: Price,
    /// Satoshis pledged by each participant.
    pub collateral: Amount,
    /// Paid to the winner.
    pub outcome1_payout: Amount,
    /// Paid to the loser.
    pub outcome2_payout: Amount,
    /// Inclusive tolerance band around `target_price`.
    pub price_threshold: Price,
}

impl ContractTerms {
    /// Winner receives both collaterals, loser receives nothing.
    pub fn winner_takes_all(target_price: Price, collateral: Amount, price_threshold: Price) -> Self {
        Self {
            target_price,
            collateral,
            outcome1_payout: collateral.saturating_mul(2),
            outcome2_payout: 0,
            price_threshold,
        }
    }

    /// Total value locked by both participants.
    pub fn total_locked(&self) -> Option<Amount> {
        self.collateral.checked_mul(2)
    }

    /// Check collateral and payout conservation.
    pub fn validate(&self) -> Result<()> {
        if self.collateral == 0 {
            return Err(Error::InvalidTerms("collateral must be > 0".into()));
        }
        if self.target_price == Price::ZERO {
            return Err(Error::InvalidTerms("target price must be > 0".into()));
        }
        let locked = self
            .total_locked()
            .ok_or_else(|| Error::InvalidTerms("collateral overflow".into()))?;
        let paid = self
            .outcome1_payout
            .checked_add(self.outcome2_payout)
            .ok_or_else(|| Error::InvalidTerms("payout overflow".into()))?;
        if paid != locked {
            return Err(Error::InvalidTerms(format!(
                "payouts sum to {paid} sats but {locked} sats are locked"
            )));
        }
        Ok(())
    }
}
