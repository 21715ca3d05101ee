//! `SigningCoordinator`: 2-of-2 signature collection and the funding
//! transaction pipeline `PendingSignatures -> Ready -> Broadcast -> Confirmed`.

use std::sync::Arc;

use crate::chain::BroadcastService;
use crate::contract::Contract;
use crate::error::{Error, Result};
use crate::params::{ContractId, ParticipantId};
use crate::state::{ContractStatus, TransactionStatus};
use crate::store::ContractStore;
use crate::store_trait::{ContractPersistence, NoopStore};
use crate::transaction::{SerializedTx, SigningArtifact, Transaction, TxId};

/// Produces signing material on behalf of participants.
pub trait SigningService: Send + Sync {
    /// Sign the funding transaction `tx_id` as `participant`.
    fn sign(&self, participant: &ParticipantId, tx_id: &TxId) -> Result<SigningArtifact>;

    /// Combine both participants' artifacts into the broadcastable form.
    fn finalize(&self, tx: &Transaction) -> Result<SerializedTx>;
}

/// What a successful [`SigningCoordinator::sign`] changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignOutcome {
    pub contract: Contract,
    /// True if this signature completed the 2-of-2 set.
    pub became_ready: bool,
}

pub struct SigningCoordinator<S: ContractPersistence = NoopStore> {
    store: Arc<ContractStore<S>>,
    signer: Arc<dyn SigningService>,
    broadcaster: Arc<dyn BroadcastService>,
}

impl<S: ContractPersistence> SigningCoordinator<S> {
    pub fn new(
        store: Arc<ContractStore<S>>,
        signer: Arc<dyn SigningService>,
        broadcaster: Arc<dyn BroadcastService>,
    ) -> Self {
        Self {
            store,
            signer,
            broadcaster,
        }
    }

    /// Record `participant`'s signature. The second distinct signature moves
    /// the transaction to `Ready` and the contract to `Active`.
    pub fn sign(&self, id: &ContractId, participant: &ParticipantId) -> Result<SignOutcome> {
        let now = self.store.now();
        self.store.update(id, |contract| {
            if contract.side_of(participant).is_none() {
                return Err(Error::UnknownParticipant(participant.clone()));
            }
            let contract_open = contract.status == ContractStatus::Pending;
            let expired = contract.is_expired(now);
            let contract_id = contract.id;

            let tx = contract.transaction_mut()?;
            let already_signed = tx.signature(participant).is_some_and(|s| s.signed);
            if already_signed {
                return Err(Error::AlreadySigned(participant.clone()));
            }
            if tx.status != TransactionStatus::PendingSignatures || !contract_open {
                return Err(Error::TransactionNotOpen);
            }
            if expired {
                return Err(Error::ContractExpired(contract_id));
            }

            let artifact = self.signer.sign(participant, &tx.id)?;
            let entry = tx
                .signature_mut(participant)
                .ok_or_else(|| Error::UnknownParticipant(participant.clone()))?;
            entry.signed = true;
            entry.artifact = Some(artifact);
            log::info!("contract {contract_id}: {participant} signed");

            let became_ready = tx.all_signed();
            if became_ready {
                tx.finalized = Some(self.signer.finalize(tx)?);
                tx.status = TransactionStatus::Ready;
                contract.transition(ContractStatus::Active)?;
                log::info!("contract {contract_id}: funding transaction ready");
            }

            Ok(SignOutcome {
                contract: contract.clone(),
                became_ready,
            })
        })
    }

    /// Hand the finalized transaction to the broadcast service.
    pub fn broadcast(&self, id: &ContractId) -> Result<Contract> {
        let now = self.store.now();
        self.store.update(id, |contract| {
            let expired = contract.is_expired(now);
            let contract_id = contract.id;
            let tx = contract.transaction_mut()?;
            if tx.status != TransactionStatus::Ready {
                return Err(Error::NotReady);
            }
            if expired {
                return Err(Error::ContractExpired(contract_id));
            }
            let finalized = tx.finalized.as_ref().ok_or(Error::NotReady)?;

            let ack = self.broadcaster.broadcast(finalized)?;
            tx.status = TransactionStatus::Broadcast;
            tx.broadcast_at = Some(now);
            log::info!(
                "contract {contract_id}: funding transaction {} broadcast ({})",
                tx.id,
                ack.reference
            );
            Ok(contract.clone())
        })
    }

    /// Network confirmation of a broadcast transaction.
    pub fn confirm(&self, id: &ContractId) -> Result<Contract> {
        let now = self.store.now();
        self.store.update(id, |contract| {
            let contract_id = contract.id;
            let tx = contract.transaction_mut()?;
            if tx.status != TransactionStatus::Broadcast {
                return Err(Error::NotBroadcast);
            }
            tx.status = TransactionStatus::Confirmed;
            tx.confirmed_at = Some(now);
            log::info!("contract {contract_id}: funding transaction confirmed");
            Ok(contract.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::params::SATS_PER_BTC;
    use crate::testing::{
        FixedInputSelector, ManualClock, MockBroadcaster, MockSigner, alice, bob, price_oracle,
        test_terms,
    };

    struct Fixture {
        store: Arc<ContractStore>,
        coordinator: SigningCoordinator,
        clock: Arc<ManualClock>,
        broadcaster: Arc<MockBroadcaster>,
        contract: Contract,
    }

    fn setup() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(ContractStore::new(
            Arc::new(FixedInputSelector::default()),
            clock.clone(),
        ));
        let broadcaster = Arc::new(MockBroadcaster::default());
        let coordinator =
            SigningCoordinator::new(store.clone(), Arc::new(MockSigner), broadcaster.clone());
        let contract = store
            .create_contract(test_terms(), alice(), bob(), price_oracle(), Duration::hours(24))
            .unwrap();
        Fixture {
            store,
            coordinator,
            clock,
            broadcaster,
            contract,
        }
    }

    #[test]
    fn sign_rejects_unknown_participant() {
        let f = setup();
        let err = f
            .coordinator
            .sign(&f.contract.id, &ParticipantId::new("mallory"))
            .unwrap_err();
        assert_eq!(err, Error::UnknownParticipant(ParticipantId::new("mallory")));
        assert_eq!(f.store.get(&f.contract.id).unwrap(), f.contract);
    }

    #[test]
    fn both_signatures_activate_contract() {
        let f = setup();
        let first = f.coordinator.sign(&f.contract.id, &alice().id).unwrap();
        assert!(!first.became_ready);
        assert_eq!(first.contract.status, ContractStatus::Pending);
        let tx = first.contract.transaction.as_ref().unwrap();
        assert_eq!(tx.status, TransactionStatus::PendingSignatures);
        assert!(tx.signature(&alice().id).unwrap().artifact.is_some());
        assert!(tx.signature(&bob().id).unwrap().artifact.is_none());
        assert!(tx.finalized.is_none());

        let second = f.coordinator.sign(&f.contract.id, &bob().id).unwrap();
        assert!(second.became_ready);
        assert_eq!(second.contract.status, ContractStatus::Active);
        let tx = second.contract.transaction.as_ref().unwrap();
        assert_eq!(tx.status, TransactionStatus::Ready);
        assert!(tx.all_signed());
        assert!(tx.finalized.is_some());
    }

    #[test]
    fn repeat_signature_is_rejected() {
        let f = setup();
        f.coordinator.sign(&f.contract.id, &alice().id).unwrap();
        assert_eq!(
            f.coordinator.sign(&f.contract.id, &alice().id).unwrap_err(),
            Error::AlreadySigned(alice().id)
        );

        f.coordinator.sign(&f.contract.id, &bob().id).unwrap();
        // third call after Ready
        assert_eq!(
            f.coordinator.sign(&f.contract.id, &bob().id).unwrap_err(),
            Error::AlreadySigned(bob().id)
        );
    }

    #[test]
    fn cancelled_contract_does_not_accept_signatures() {
        let f = setup();
        f.store.cancel(&f.contract.id).unwrap();
        assert_eq!(
            f.coordinator.sign(&f.contract.id, &alice().id).unwrap_err(),
            Error::TransactionNotOpen
        );
    }

    #[test]
    fn expired_contract_does_not_accept_signatures() {
        let f = setup();
        f.clock.advance(Duration::hours(25));
        assert_eq!(
            f.coordinator.sign(&f.contract.id, &alice().id).unwrap_err(),
            Error::ContractExpired(f.contract.id)
        );
    }

    #[test]
    fn broadcast_requires_ready() {
        let f = setup();
        assert_eq!(
            f.coordinator.broadcast(&f.contract.id).unwrap_err(),
            Error::NotReady
        );
        f.coordinator.sign(&f.contract.id, &alice().id).unwrap();
        assert_eq!(
            f.coordinator.broadcast(&f.contract.id).unwrap_err(),
            Error::NotReady
        );
        assert!(f.broadcaster.sent().is_empty());
    }

    #[test]
    fn broadcast_succeeds_exactly_once() {
        let f = setup();
        f.coordinator.sign(&f.contract.id, &alice().id).unwrap();
        f.coordinator.sign(&f.contract.id, &bob().id).unwrap();

        let contract = f.coordinator.broadcast(&f.contract.id).unwrap();
        let tx = contract.transaction.as_ref().unwrap();
        assert_eq!(tx.status, TransactionStatus::Broadcast);
        assert!(tx.broadcast_at.unwrap() <= f.clock.now());
        assert_eq!(f.broadcaster.sent().len(), 1);

        assert_eq!(
            f.coordinator.broadcast(&f.contract.id).unwrap_err(),
            Error::NotReady
        );
        assert_eq!(f.broadcaster.sent().len(), 1);
    }

    #[test]
    fn confirm_requires_broadcast() {
        let f = setup();
        assert_eq!(
            f.coordinator.confirm(&f.contract.id).unwrap_err(),
            Error::NotBroadcast
        );
        f.coordinator.sign(&f.contract.id, &alice().id).unwrap();
        f.coordinator.sign(&f.contract.id, &bob().id).unwrap();
        f.coordinator.broadcast(&f.contract.id).unwrap();

        let confirmed = f.coordinator.confirm(&f.contract.id).unwrap();
        let tx = confirmed.transaction.as_ref().unwrap();
        assert_eq!(tx.status, TransactionStatus::Confirmed);
        assert!(tx.confirmed_at.is_some());
        assert_eq!(tx.total_input(), 2 * (SATS_PER_BTC / 10));

        assert_eq!(
            f.coordinator.confirm(&f.contract.id).unwrap_err(),
            Error::NotBroadcast
        );
    }

    #[test]
    fn failing_broadcaster_leaves_transaction_ready() {
        let f = setup();
        f.coordinator.sign(&f.contract.id, &alice().id).unwrap();
        f.coordinator.sign(&f.contract.id, &bob().id).unwrap();
        f.broadcaster.fail_next();

        let err = f.coordinator.broadcast(&f.contract.id).unwrap_err();
        assert!(matches!(err, Error::Broadcast(_)));
        let tx = f.store.get(&f.contract.id).unwrap().transaction.unwrap();
        assert_eq!(tx.status, TransactionStatus::Ready);
        assert!(tx.broadcast_at.is_none());
    }
}
