//! `ContractStore`: owner of every contract and the only writer of
//! contract state.
//!
//! Each contract sits in its own mutex slot so operations on one contract
//! are serialized while different contracts proceed in parallel. Mutations
//! run against a draft copy that is committed only when the whole operation
//! succeeds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};

use crate::chain::InputSelector;
use crate::clock::Clock;
use crate::contract::Contract;
use crate::error::{Error, Result};
use crate::params::{Amount, ContractId, ContractTerms, Oracle, Participant, Price};
use crate::state::ContractStatus;
use crate::store_trait::{ContractPersistence, NoopStore};
use crate::transaction::{BitcoinInput, Transaction};

/// `None` once the contract has been removed.
type Slot = Arc<Mutex<Option<Contract>>>;

#[derive(Default)]
struct Book {
    /// Creation order.
    order: Vec<ContractId>,
    slots: HashMap<ContractId, Slot>,
    next_sequence: u64,
}

pub struct ContractStore<S: ContractPersistence = NoopStore> {
    book: RwLock<Book>,
    last_price: Mutex<Option<Price>>,
    inputs: Arc<dyn InputSelector>,
    clock: Arc<dyn Clock>,
    persistence: Option<Arc<Mutex<S>>>,
}

impl ContractStore<NoopStore> {
    /// Create an in-memory store without persistence.
    pub fn new(inputs: Arc<dyn InputSelector>, clock: Arc<dyn Clock>) -> Self {
        Self {
            book: RwLock::new(Book::default()),
            last_price: Mutex::new(None),
            inputs,
            clock,
            persistence: None,
        }
    }
}

impl<S: ContractPersistence> ContractStore<S> {
    /// Create a store that writes every committed change through to `persistence`.
    pub fn with_persistence(
        inputs: Arc<dyn InputSelector>,
        clock: Arc<dyn Clock>,
        persistence: Arc<Mutex<S>>,
    ) -> Self {
        Self {
            book: RwLock::new(Book::default()),
            last_price: Mutex::new(None),
            inputs,
            clock,
            persistence: Some(persistence),
        }
    }

    /// Load previously persisted contracts, keeping their stored order.
    /// Returns the number of contracts loaded.
    pub fn restore(&self) -> std::result::Result<usize, String> {
        let Some(persistence) = &self.persistence else {
            return Ok(0);
        };
        let contracts = persistence
            .lock()
            .map_err(|_| "persistence mutex poisoned".to_string())?
            .load_contracts()?;

        let mut book = self
            .book
            .write()
            .map_err(|_| "contract book poisoned".to_string())?;
        let mut loaded = 0;
        for contract in contracts {
            if book.slots.contains_key(&contract.id) {
                continue;
            }
            book.order.push(contract.id);
            book.slots
                .insert(contract.id, Arc::new(Mutex::new(Some(contract))));
            book.next_sequence += 1;
            loaded += 1;
        }
        log::info!("contract store: restored {loaded} contracts");
        Ok(loaded)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Last oracle price seen through [`observe_price`](Self::observe_price).
    pub fn last_price(&self) -> Option<Price> {
        self.last_price.lock().ok().and_then(|p| *p)
    }

    // ── Creation ────────────────────────────────────────────────────────

    /// Validate terms, lock collateral from both participants and register a
    /// new `Pending` contract with its unsigned funding transaction.
    pub fn create_contract(
        &self,
        terms: ContractTerms,
        participant1: Participant,
        participant2: Participant,
        oracle: Oracle,
        duration: Duration,
    ) -> Result<Contract> {
        terms.validate()?;
        if duration <= Duration::zero() {
            return Err(Error::InvalidTerms("duration must be positive".into()));
        }
        if participant1.id == participant2.id {
            return Err(Error::InvalidTerms(format!(
                "participants must be distinct (both are {})",
                participant1.id
            )));
        }

        let created_at = self.clock.now();
        let expires_at = created_at
            .checked_add_signed(duration)
            .ok_or_else(|| Error::InvalidTerms("duration out of range".into()))?;

        let sequence = {
            let mut book = self.book.write().map_err(|_| Error::LockPoisoned)?;
            let seq = book.next_sequence;
            book.next_sequence += 1;
            seq
        };
        let id = ContractId::derive(
            &terms,
            &participant1.id,
            &participant2.id,
            &oracle,
            created_at.timestamp_millis(),
            sequence,
        );

        let input1 = self.inputs.select_input(&participant1, terms.collateral)?;
        check_input(&input1, &participant1, terms.collateral)?;
        let input2 = self.inputs.select_input(&participant2, terms.collateral)?;
        check_input(&input2, &participant2, terms.collateral)?;

        let transaction = Transaction::new(
            &id,
            vec![input1, input2],
            participant1.id.clone(),
            participant2.id.clone(),
        );

        let contract = Contract {
            id,
            status: ContractStatus::Pending,
            created_at,
            expires_at,
            executed_at: None,
            participant1,
            participant2,
            oracle,
            terms,
            current_price: self.last_price().unwrap_or(terms.target_price),
            transaction: Some(transaction),
            winner: None,
            final_payout: None,
        };

        self.persist(&contract)?;
        let mut book = self.book.write().map_err(|_| Error::LockPoisoned)?;
        book.order.push(id);
        book.slots
            .insert(id, Arc::new(Mutex::new(Some(contract.clone()))));
        log::info!("contract {id}: created, expires {expires_at}");
        Ok(contract)
    }

    // ── Reads ───────────────────────────────────────────────────────────

    pub fn get(&self, id: &ContractId) -> Result<Contract> {
        let slot = self.slot(id)?;
        let guard = slot.lock().map_err(|_| Error::LockPoisoned)?;
        guard.clone().ok_or(Error::NotFound(*id))
    }

    /// Snapshot of every contract in creation order.
    pub fn list(&self) -> Result<Vec<Contract>> {
        let slots: Vec<Slot> = {
            let book = self.book.read().map_err(|_| Error::LockPoisoned)?;
            book.order
                .iter()
                .filter_map(|id| book.slots.get(id).cloned())
                .collect()
        };
        let mut contracts = Vec::with_capacity(slots.len());
        for slot in slots {
            let guard = slot.lock().map_err(|_| Error::LockPoisoned)?;
            if let Some(contract) = guard.as_ref() {
                contracts.push(contract.clone());
            }
        }
        Ok(contracts)
    }

    pub fn len(&self) -> usize {
        self.book.read().map(|b| b.order.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Mutations ───────────────────────────────────────────────────────

    /// Apply `f` to a draft of the contract under its lock. The draft replaces
    /// the stored contract only if `f` succeeds and the draft was persisted.
    pub(crate) fn update<R>(
        &self,
        id: &ContractId,
        f: impl FnOnce(&mut Contract) -> Result<R>,
    ) -> Result<R> {
        let slot = self.slot(id)?;
        let mut guard = slot.lock().map_err(|_| Error::LockPoisoned)?;
        let current = guard.as_ref().ok_or(Error::NotFound(*id))?;
        let mut draft = current.clone();
        let out = f(&mut draft)?;
        if &draft != current {
            self.persist(&draft)?;
            *guard = Some(draft);
        }
        Ok(out)
    }

    /// Move a contract along one edge of the lifecycle.
    pub(crate) fn transition(&self, id: &ContractId, to: ContractStatus) -> Result<Contract> {
        self.update(id, |contract| {
            contract.transition(to)?;
            Ok(contract.clone())
        })
    }

    /// Withdraw a contract that has not been activated.
    pub fn cancel(&self, id: &ContractId) -> Result<Contract> {
        let now = self.clock.now();
        self.update(id, |contract| {
            if contract.effective_status(now) == ContractStatus::Expired {
                return Err(Error::ContractExpired(contract.id));
            }
            contract.transition(ContractStatus::Cancelled)?;
            log::info!("contract {}: cancelled", contract.id);
            Ok(contract.clone())
        })
    }

    /// Tear a contract down. Later operations on `id` fail with `NotFound`.
    /// If the persisted copy cannot be deleted the contract stays in place.
    pub fn remove(&self, id: &ContractId) -> Result<Contract> {
        let slot = self.slot(id)?;
        let mut guard = slot.lock().map_err(|_| Error::LockPoisoned)?;
        if guard.is_none() {
            return Err(Error::NotFound(*id));
        }
        if let Some(persistence) = &self.persistence {
            persistence
                .lock()
                .map_err(|_| Error::Persistence("persistence mutex poisoned".into()))?
                .remove_contract(id)
                .map_err(Error::Persistence)?;
        }
        {
            let mut book = self.book.write().map_err(|_| Error::LockPoisoned)?;
            book.slots.remove(id);
            book.order.retain(|other| other != id);
        }
        let contract = guard.take().ok_or(Error::NotFound(*id))?;
        log::info!("contract {id}: removed");
        Ok(contract)
    }

    /// Record a new oracle price on every contract that is still open.
    /// Returns the number of contracts updated.
    pub fn observe_price(&self, price: Price) -> usize {
        if let Ok(mut last) = self.last_price.lock() {
            *last = Some(price);
        }
        let ids: Vec<ContractId> = match self.book.read() {
            Ok(book) => book.order.clone(),
            Err(_) => return 0,
        };
        let mut updated = 0;
        for id in ids {
            let res = self.update(&id, |contract| {
                if contract.status.is_terminal() || contract.current_price == price {
                    return Ok(false);
                }
                contract.current_price = price;
                Ok(true)
            });
            if let Ok(true) = res {
                updated += 1;
            }
        }
        updated
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn slot(&self, id: &ContractId) -> Result<Slot> {
        let book = self.book.read().map_err(|_| Error::LockPoisoned)?;
        book.slots.get(id).cloned().ok_or(Error::NotFound(*id))
    }

    fn persist(&self, contract: &Contract) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let mut p = persistence
            .lock()
            .map_err(|_| Error::Persistence("persistence mutex poisoned".into()))?;
        p.save_contract(contract).map_err(|e| {
            log::warn!("contract {}: failed to persist: {e}", contract.id);
            Error::Persistence(e)
        })
    }
}

fn check_input(input: &BitcoinInput, owner: &Participant, amount: Amount) -> Result<()> {
    if input.owner != owner.id {
        return Err(Error::InputSelection(format!(
            "input {}:{} belongs to {}, expected {}",
            input.txid, input.vout, input.owner, owner.id
        )));
    }
    if input.amount != amount {
        return Err(Error::InputSelection(format!(
            "input {}:{} locks {} sats, expected {amount}",
            input.txid, input.vout, input.amount
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SATS_PER_BTC;
    use crate::state::TransactionStatus;
    use crate::testing::{
        FixedInputSelector, ManualClock, TestStore, alice, bob, price_oracle, test_terms,
    };

    fn test_store() -> (ContractStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = ContractStore::new(Arc::new(FixedInputSelector::default()), clock.clone());
        (store, clock)
    }

    fn create(store: &ContractStore) -> Contract {
        store
            .create_contract(test_terms(), alice(), bob(), price_oracle(), Duration::hours(24))
            .unwrap()
    }

    #[test]
    fn create_contract_locks_collateral() {
        let (store, clock) = test_store();
        let contract = create(&store);

        assert_eq!(contract.status, ContractStatus::Pending);
        assert_eq!(contract.created_at, clock.now());
        assert_eq!(contract.expires_at, clock.now() + Duration::hours(24));
        assert_eq!(contract.current_price, contract.terms.target_price);

        let tx = contract.transaction.as_ref().unwrap();
        assert_eq!(tx.status, TransactionStatus::PendingSignatures);
        assert_eq!(tx.inputs.len(), 2);
        assert_eq!(tx.input_from(&alice().id), SATS_PER_BTC / 10);
        assert_eq!(tx.input_from(&bob().id), SATS_PER_BTC / 10);
        assert!(tx.signatures.iter().all(|s| !s.signed));
    }

    #[test]
    fn create_contract_rejects_invalid_terms() {
        let (store, _) = test_store();

        let mut terms = test_terms();
        terms.outcome1_payout -= 1;
        let err = store
            .create_contract(terms, alice(), bob(), price_oracle(), Duration::hours(1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTerms(_)));

        let err = store
            .create_contract(test_terms(), alice(), bob(), price_oracle(), Duration::zero())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTerms(_)));

        let err = store
            .create_contract(test_terms(), alice(), alice(), price_oracle(), Duration::hours(1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTerms(_)));

        assert!(store.is_empty());
    }

    #[test]
    fn create_contract_checks_selected_inputs() {
        let clock = Arc::new(ManualClock::default());
        let selector = FixedInputSelector {
            amount_override: Some(1),
        };
        let store = ContractStore::new(Arc::new(selector), clock);
        let err = store
            .create_contract(test_terms(), alice(), bob(), price_oracle(), Duration::hours(1))
            .unwrap_err();
        assert!(matches!(err, Error::InputSelection(_)));
    }

    #[test]
    fn list_preserves_creation_order() {
        let (store, _) = test_store();
        let ids: Vec<ContractId> = (0..5).map(|_| create(&store).id).collect();
        let listed: Vec<ContractId> = store.list().unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, listed);
    }

    #[test]
    fn ids_are_unique() {
        let (store, _) = test_store();
        let a = create(&store);
        let b = create(&store);
        assert_ne!(a.id, b.id);
        assert_ne!(
            a.transaction.unwrap().id,
            b.transaction.unwrap().id
        );
    }

    #[test]
    fn transition_enforces_table() {
        let (store, _) = test_store();
        let c = create(&store);

        let err = store.transition(&c.id, ContractStatus::Executed).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        let err = store
            .transition(&ContractId([0xee; 32]), ContractStatus::Active)
            .unwrap_err();
        assert_eq!(err, Error::NotFound(ContractId([0xee; 32])));

        let active = store.transition(&c.id, ContractStatus::Active).unwrap();
        assert_eq!(active.status, ContractStatus::Active);
        assert_eq!(store.get(&c.id).unwrap().status, ContractStatus::Active);
    }

    #[test]
    fn failed_update_leaves_contract_untouched() {
        let (store, _) = test_store();
        let c = create(&store);
        let err = store
            .update(&c.id, |contract| {
                contract.current_price = Price(1);
                Err::<(), _>(Error::NotReady)
            })
            .unwrap_err();
        assert_eq!(err, Error::NotReady);
        assert_eq!(store.get(&c.id).unwrap(), c);
    }

    #[test]
    fn cancel_only_from_pending() {
        let (store, clock) = test_store();
        let c = create(&store);
        let cancelled = store.cancel(&c.id).unwrap();
        assert_eq!(cancelled.status, ContractStatus::Cancelled);
        assert!(matches!(
            store.cancel(&c.id),
            Err(Error::InvalidTransition { .. })
        ));

        let expired = create(&store);
        clock.advance(Duration::hours(25));
        assert_eq!(
            store.cancel(&expired.id).unwrap_err(),
            Error::ContractExpired(expired.id)
        );
    }

    #[test]
    fn remove_makes_contract_unknown() {
        let (store, _) = test_store();
        let c = create(&store);
        let other = create(&store);
        store.remove(&c.id).unwrap();
        assert_eq!(store.get(&c.id).unwrap_err(), Error::NotFound(c.id));
        assert_eq!(store.remove(&c.id).unwrap_err(), Error::NotFound(c.id));
        assert_eq!(store.list().unwrap().len(), 1);
        assert_eq!(store.list().unwrap()[0].id, other.id);
    }

    #[test]
    fn observe_price_skips_terminal_contracts() {
        let (store, _) = test_store();
        let open = create(&store);
        let cancelled = create(&store);
        store.cancel(&cancelled.id).unwrap();

        let price = Price::from_dollars(30_123);
        assert_eq!(store.observe_price(price), 1);
        assert_eq!(store.get(&open.id).unwrap().current_price, price);
        assert_eq!(
            store.get(&cancelled.id).unwrap().current_price,
            cancelled.current_price
        );
        assert_eq!(store.last_price(), Some(price));

        // new contracts start from the last observation
        assert_eq!(create(&store).current_price, price);
    }

    #[test]
    fn persistence_follows_commits() {
        let clock = Arc::new(ManualClock::default());
        let persistence = Arc::new(Mutex::new(TestStore::default()));
        let store = ContractStore::with_persistence(
            Arc::new(FixedInputSelector::default()),
            clock.clone(),
            persistence.clone(),
        );
        let c = store
            .create_contract(test_terms(), alice(), bob(), price_oracle(), Duration::hours(1))
            .unwrap();
        store.transition(&c.id, ContractStatus::Active).unwrap();
        assert_eq!(
            persistence.lock().unwrap().contracts[0].status,
            ContractStatus::Active
        );

        let reloaded = ContractStore::with_persistence(
            Arc::new(FixedInputSelector::default()),
            clock,
            persistence.clone(),
        );
        assert_eq!(reloaded.restore().unwrap(), 1);
        assert_eq!(reloaded.get(&c.id).unwrap().status, ContractStatus::Active);

        store.remove(&c.id).unwrap();
        assert!(persistence.lock().unwrap().contracts.is_empty());
    }

    #[test]
    fn failed_persist_aborts_commit() {
        let persistence = Arc::new(Mutex::new(TestStore::default()));
        let store = ContractStore::with_persistence(
            Arc::new(FixedInputSelector::default()),
            Arc::new(ManualClock::default()),
            persistence.clone(),
        );
        let c = store
            .create_contract(test_terms(), alice(), bob(), price_oracle(), Duration::hours(1))
            .unwrap();

        persistence.lock().unwrap().fail_writes = true;
        let err = store.transition(&c.id, ContractStatus::Active).unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(store.get(&c.id).unwrap().status, ContractStatus::Pending);

        let err = store
            .create_contract(test_terms(), alice(), bob(), price_oracle(), Duration::hours(1))
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(store.len(), 1);

        assert!(matches!(store.remove(&c.id), Err(Error::Persistence(_))));
        assert!(store.get(&c.id).is_ok());
        assert_eq!(persistence.lock().unwrap().contracts.len(), 1);
    }
}
