//! `ExecutionEngine`: converts an oracle price into the contract outcome
//! and final payout.

use std::sync::Arc;

use crate::contract::{Contract, FinalPayout, Side};
use crate::error::{Error, Result};
use crate::params::{ContractId, ContractTerms, Price};
use crate::state::{ContractStatus, TransactionStatus};
use crate::store::ContractStore;
use crate::store_trait::{ContractPersistence, NoopStore};

/// Outcome of settling a set of terms against one price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub winner: Side,
    pub payout: FinalPayout,
    pub price_diff: Price,
}

/// Participant 1 wins when the price lands within the inclusive threshold
/// band around the target, participant 2 otherwise. The winner receives
/// `outcome1_payout` and the loser `outcome2_payout`.
pub fn resolve_outcome(terms: &ContractTerms, observed: Price) -> Settlement {
    let price_diff = observed.abs_diff(terms.target_price);
    let winner = if price_diff <= terms.price_threshold {
        Side::Participant1
    } else {
        Side::Participant2
    };
    let payout = match winner {
        Side::Participant1 => FinalPayout {
            participant1_amount: terms.outcome1_payout,
            participant2_amount: terms.outcome2_payout,
        },
        Side::Participant2 => FinalPayout {
            participant1_amount: terms.outcome2_payout,
            participant2_amount: terms.outcome1_payout,
        },
    };
    Settlement {
        winner,
        payout,
        price_diff,
    }
}

pub struct ExecutionEngine<S: ContractPersistence = NoopStore> {
    store: Arc<ContractStore<S>>,
}

impl<S: ContractPersistence> ExecutionEngine<S> {
    pub fn new(store: Arc<ContractStore<S>>) -> Self {
        Self { store }
    }

    /// Settle an active, confirmed, unexpired contract at `observed`.
    pub fn execute(&self, id: &ContractId, observed: Price) -> Result<Contract> {
        self.settle(id, Some(observed))
    }

    /// Settle at the contract's current observed price, read under the same
    /// lock that commits the settlement.
    pub fn execute_at_current_price(&self, id: &ContractId) -> Result<Contract> {
        self.settle(id, None)
    }

    fn settle(&self, id: &ContractId, observed: Option<Price>) -> Result<Contract> {
        let now = self.store.now();
        self.store.update(id, |contract| {
            if contract.status == ContractStatus::Executed {
                return Err(Error::AlreadyExecuted);
            }
            let confirmed = contract
                .transaction
                .as_ref()
                .is_some_and(|tx| tx.status == TransactionStatus::Confirmed);
            if contract.effective_status(now) != ContractStatus::Active || !confirmed {
                return Err(Error::NotExecutable);
            }

            let observed = observed.unwrap_or(contract.current_price);
            let settlement = resolve_outcome(&contract.terms, observed);
            contract.transition(ContractStatus::Executed)?;
            contract.current_price = observed;
            contract.executed_at = Some(now);
            contract.winner = Some(settlement.winner);
            contract.final_payout = Some(settlement.payout);
            log::info!(
                "contract {}: executed at {observed} (diff {}), winner {:?}",
                contract.id,
                settlement.price_diff,
                settlement.winner
            );
            Ok(contract.clone())
        })
    }
}
