use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::params::{Amount, ContractId, ContractTerms, Oracle, Participant, ParticipantId, Price};
use crate::state::ContractStatus;
use crate::transaction::Transaction;

/// Which of the two bound participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Participant1,
    Participant2,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Participant1 => Side::Participant2,
            Side::Participant2 => Side::Participant1,
        }
    }
}

/// Post-execution distribution of the locked value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalPayout {
    pub participant1_amount: Amount,
    pub participant2_amount: Amount,
}

impl FinalPayout {
    pub fn total(&self) -> Amount {
        self.participant1_amount + self.participant2_amount
    }
}

/// A two-party oracle-settled contract and its funding transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub participant1: Participant,
    pub participant2: Participant,
    pub oracle: Oracle,
    pub terms: ContractTerms,
    pub current_price: Price,
    pub transaction: Option<Transaction>,
    pub winner: Option<Side>,
    pub final_payout: Option<FinalPayout>,
}

impl Contract {
    pub fn participant(&self, side: Side) -> &Participant {
        match side {
            Side::Participant1 => &self.participant1,
            Side::Participant2 => &self.participant2,
        }
    }

    /// Which side `id` is bound to, if any.
    pub fn side_of(&self, id: &ParticipantId) -> Option<Side> {
        if &self.participant1.id == id {
            Some(Side::Participant1)
        } else if &self.participant2.id == id {
            Some(Side::Participant2)
        } else {
            None
        }
    }

    pub fn winner_participant(&self) -> Option<&Participant> {
        self.winner.map(|side| self.participant(side))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Status for decision purposes: a non-terminal contract past its
    /// expiry reads as `Expired`. Nothing is written back.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ContractStatus {
        if !self.status.is_terminal() && self.is_expired(now) {
            ContractStatus::Expired
        } else {
            self.status
        }
    }

    pub(crate) fn transition(&mut self, to: ContractStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to,
            });
        }
        log::debug!("contract {}: {:?} -> {:?}", self.id, self.status, to);
        self.status = to;
        Ok(())
    }

    pub(crate) fn transaction_mut(&mut self) -> Result<&mut Transaction> {
        // Every stored contract is created with its transaction.
        self.transaction.as_mut().ok_or(Error::TransactionNotOpen)
    }
}
