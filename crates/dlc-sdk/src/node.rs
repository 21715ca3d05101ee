//! `DlcNode`: single entry point over the contract lifecycle.
//!
//! Owns the contract store, signing coordinator, execution engine and oracle
//! feed behind one `&self` API, plus the background tasks: the oracle poller
//! and one confirmation timer per broadcast contract. Contract operations run
//! on `tokio::task::spawn_blocking` because collaborators may block.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::chain::{BroadcastService, InputSelector};
use crate::clock::Clock;
use crate::contract::Contract;
use crate::error::{Error, NodeError};
use crate::events::ContractEvent;
use crate::execution::ExecutionEngine;
use crate::oracle::{OracleFeed, PriceObservation, PriceSource};
use crate::params::{ContractId, ContractTerms, Oracle, Participant, ParticipantId, Price};
use crate::signing::{SignOutcome, SigningCoordinator, SigningService};
use crate::state::TransactionStatus;
use crate::store::ContractStore;
use crate::store_trait::{ContractPersistence, NoopStore};

// ── Configuration ───────────────────────────────────────────────────────────

/// Configuration for the node's background tasks.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// How often the oracle poller reads the price source (default: 5s).
    pub poll_interval: Duration,
    /// Delay between broadcast and simulated network confirmation (default: 5s).
    pub confirmation_delay: Duration,
    /// Capacity of the event channel (default: 256).
    pub event_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            confirmation_delay: Duration::from_secs(5),
            event_capacity: 256,
        }
    }
}

/// External services the node drives.
#[derive(Clone)]
pub struct Collaborators {
    pub inputs: Arc<dyn InputSelector>,
    pub signer: Arc<dyn SigningService>,
    pub broadcaster: Arc<dyn BroadcastService>,
    pub clock: Arc<dyn Clock>,
}

// ── Struct ──────────────────────────────────────────────────────────────────

pub struct DlcNode<S: ContractPersistence = NoopStore> {
    store: Arc<ContractStore<S>>,
    coordinator: Arc<SigningCoordinator<S>>,
    engine: Arc<ExecutionEngine<S>>,
    feed: Arc<OracleFeed>,
    config: NodeConfig,
    events: broadcast::Sender<ContractEvent>,
    timers: Arc<Mutex<HashMap<ContractId, JoinHandle<()>>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

// ── Construction ────────────────────────────────────────────────────────────

impl DlcNode<NoopStore> {
    /// Create a node that keeps contracts in memory only.
    pub fn new(
        collaborators: Collaborators,
        config: NodeConfig,
    ) -> (Self, broadcast::Receiver<ContractEvent>) {
        let store = ContractStore::new(collaborators.inputs.clone(), collaborators.clock.clone());
        Self::assemble(Arc::new(store), collaborators, config)
    }
}

impl<S: ContractPersistence> DlcNode<S> {
    /// Create a node backed by `persistence`, restoring every stored contract.
    pub fn with_store(
        collaborators: Collaborators,
        persistence: Arc<Mutex<S>>,
        config: NodeConfig,
    ) -> Result<(Self, broadcast::Receiver<ContractEvent>), NodeError> {
        let store = ContractStore::with_persistence(
            collaborators.inputs.clone(),
            collaborators.clock.clone(),
            persistence,
        );
        store.restore().map_err(NodeError::Store)?;
        Ok(Self::assemble(Arc::new(store), collaborators, config))
    }

    fn assemble(
        store: Arc<ContractStore<S>>,
        collaborators: Collaborators,
        config: NodeConfig,
    ) -> (Self, broadcast::Receiver<ContractEvent>) {
        let (events, rx) = broadcast::channel(config.event_capacity.max(1));
        let coordinator = SigningCoordinator::new(
            store.clone(),
            collaborators.signer,
            collaborators.broadcaster,
        );
        let engine = ExecutionEngine::new(store.clone());
        (
            Self {
                store,
                coordinator: Arc::new(coordinator),
                engine: Arc::new(engine),
                feed: Arc::new(OracleFeed::new()),
                config,
                events,
                timers: Arc::new(Mutex::new(HashMap::new())),
                poller: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            },
            rx,
        )
    }

    // ── Internal: spawn_blocking helper ─────────────────────────────────

    async fn run_blocking<F, R>(&self, f: F) -> Result<R, NodeError>
    where
        F: FnOnce() -> Result<R, Error> + Send + 'static,
        R: Send + 'static,
    {
        self.ensure_running()?;
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| NodeError::Task(e.to_string()))?
            .map_err(NodeError::Contract)
    }

    fn ensure_running(&self) -> Result<(), NodeError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(NodeError::ShutDown);
        }
        Ok(())
    }

    fn emit(&self, event: ContractEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    // ── Lifecycle operations ────────────────────────────────────────────

    pub async fn create_contract(
        &self,
        terms: ContractTerms,
        participant1: Participant,
        participant2: Participant,
        oracle: Oracle,
        duration: chrono::Duration,
    ) -> Result<Contract, NodeError> {
        let store = self.store.clone();
        let contract = self
            .run_blocking(move || {
                store.create_contract(terms, participant1, participant2, oracle, duration)
            })
            .await?;
        self.emit(ContractEvent::Created(contract.clone()));
        Ok(contract)
    }

    pub async fn sign(
        &self,
        id: &ContractId,
        participant: &ParticipantId,
    ) -> Result<SignOutcome, NodeError> {
        let coordinator = self.coordinator.clone();
        let (id, who) = (*id, participant.clone());
        let outcome = self.run_blocking(move || coordinator.sign(&id, &who)).await?;
        self.emit(ContractEvent::Signed {
            contract: outcome.contract.clone(),
            participant: participant.clone(),
        });
        if outcome.became_ready {
            self.emit(ContractEvent::Ready(outcome.contract.clone()));
        }
        Ok(outcome)
    }

    /// Broadcast the funding transaction and schedule its confirmation.
    pub async fn broadcast(&self, id: &ContractId) -> Result<Contract, NodeError> {
        let coordinator = self.coordinator.clone();
        let id = *id;
        let contract = self.run_blocking(move || coordinator.broadcast(&id)).await?;
        self.emit(ContractEvent::Broadcast(contract.clone()));
        self.schedule_confirmation(id)?;
        Ok(contract)
    }

    /// Confirm a broadcast transaction without waiting for the timer.
    pub async fn confirm(&self, id: &ContractId) -> Result<Contract, NodeError> {
        let coordinator = self.coordinator.clone();
        let id = *id;
        let contract = self.run_blocking(move || coordinator.confirm(&id)).await?;
        self.abort_timer(&id);
        self.emit(ContractEvent::Confirmed(contract.clone()));
        Ok(contract)
    }

    pub async fn execute(&self, id: &ContractId, price: Price) -> Result<Contract, NodeError> {
        let engine = self.engine.clone();
        let id = *id;
        let contract = self.run_blocking(move || engine.execute(&id, price)).await?;
        self.emit(ContractEvent::Executed(contract.clone()));
        Ok(contract)
    }

    /// Execute at the latest oracle observation.
    pub async fn execute_at_current_price(&self, id: &ContractId) -> Result<Contract, NodeError> {
        let engine = self.engine.clone();
        let id = *id;
        let contract = self
            .run_blocking(move || engine.execute_at_current_price(&id))
            .await?;
        self.emit(ContractEvent::Executed(contract.clone()));
        Ok(contract)
    }

    pub async fn cancel(&self, id: &ContractId) -> Result<Contract, NodeError> {
        let store = self.store.clone();
        let id = *id;
        let contract = self.run_blocking(move || store.cancel(&id)).await?;
        self.emit(ContractEvent::Cancelled(contract.clone()));
        Ok(contract)
    }

    /// Tear a contract down and abort its pending confirmation, if any.
    pub async fn remove_contract(&self, id: &ContractId) -> Result<Contract, NodeError> {
        let id = *id;
        let store = self.store.clone();
        let contract = self.run_blocking(move || store.remove(&id)).await?;
        self.abort_timer(&id);
        self.emit(ContractEvent::Removed(id));
        Ok(contract)
    }

    // ── Reads ───────────────────────────────────────────────────────────

    pub fn get(&self, id: &ContractId) -> Result<Contract, NodeError> {
        Ok(self.store.get(id)?)
    }

    pub fn list(&self) -> Result<Vec<Contract>, NodeError> {
        Ok(self.store.list()?)
    }

    // ── Oracle ──────────────────────────────────────────────────────────

    pub fn current_price(&self) -> Option<PriceObservation> {
        self.feed.latest()
    }

    /// Feed one price in as if the poller had read it.
    pub fn record_price(&self, price: Price) -> Option<PriceObservation> {
        let observation = PriceObservation {
            price,
            observed_at: self.store.now(),
        };
        self.feed.record(observation).then(|| {
            apply_observation(&self.store, &self.events, observation);
            observation
        })
    }

    /// Start polling `source` every `poll_interval`. Replaces any running poller.
    pub fn start_oracle(&self, source: Arc<dyn PriceSource>) -> Result<(), NodeError> {
        self.ensure_running()?;
        let runtime = Handle::try_current().map_err(|e| NodeError::Task(e.to_string()))?;
        let store = self.store.clone();
        let feed = self.feed.clone();
        let events = self.events.clone();
        let interval = self.config.poll_interval;

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let (store, feed, events, source) =
                    (store.clone(), feed.clone(), events.clone(), source.clone());
                let polled = tokio::task::spawn_blocking(move || {
                    let now = store.now();
                    let observation = feed.poll(source.as_ref(), now)?;
                    if let Some(observation) = observation {
                        apply_observation(&store, &events, observation);
                    }
                    Ok::<_, Error>(observation)
                })
                .await;
                match polled {
                    Ok(Ok(Some(obs))) => log::debug!("oracle: price {}", obs.price),
                    Ok(Ok(None)) => log::debug!("oracle: stale observation dropped"),
                    Ok(Err(e)) => log::warn!("oracle: poll failed: {e}"),
                    Err(e) => log::warn!("oracle: poll task failed: {e}"),
                }
            }
        });

        let mut poller = self
            .poller
            .lock()
            .map_err(|_| NodeError::Task("poller mutex poisoned".into()))?;
        if let Some(previous) = poller.replace(handle) {
            previous.abort();
        }
        log::info!("oracle: polling every {interval:?}");
        Ok(())
    }

    // ── Background tasks ────────────────────────────────────────────────

    /// Schedule confirmation for every contract whose funding transaction
    /// was broadcast but not yet confirmed, e.g. after a restart. Must be
    /// called from within a tokio runtime. Returns the number of timers armed.
    pub fn resume_confirmations(&self) -> Result<usize, NodeError> {
        self.ensure_running()?;
        let pending: Vec<ContractId> = self
            .store
            .list()?
            .into_iter()
            .filter(|c| {
                !c.status.is_terminal()
                    && c.transaction
                        .as_ref()
                        .is_some_and(|tx| tx.status == TransactionStatus::Broadcast)
            })
            .map(|c| c.id)
            .collect();
        for id in &pending {
            self.schedule_confirmation(*id)?;
        }
        if !pending.is_empty() {
            log::info!("node: resumed {} pending confirmations", pending.len());
        }
        Ok(pending.len())
    }

    fn schedule_confirmation(&self, id: ContractId) -> Result<(), NodeError> {
        let runtime = Handle::try_current().map_err(|e| NodeError::Task(e.to_string()))?;
        let mut timers = self
            .timers
            .lock()
            .map_err(|_| NodeError::Task("timer mutex poisoned".into()))?;

        let coordinator = self.coordinator.clone();
        let events = self.events.clone();
        let registry = self.timers.clone();
        let delay = self.config.confirmation_delay;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let confirmed = tokio::task::spawn_blocking(move || coordinator.confirm(&id)).await;
            match confirmed {
                Ok(Ok(contract)) => {
                    let _ = events.send(ContractEvent::Confirmed(contract));
                }
                Ok(Err(e)) if e.is_stale_race() => {
                    log::debug!("contract {id}: confirmation skipped: {e}");
                }
                Ok(Err(e)) => log::warn!("contract {id}: confirmation failed: {e}"),
                Err(e) => log::warn!("contract {id}: confirmation task failed: {e}"),
            }
            if let Ok(mut timers) = registry.lock() {
                timers.remove(&id);
            }
        });

        if let Some(previous) = timers.insert(id, handle) {
            previous.abort();
        }
        Ok(())
    }

    fn abort_timer(&self, id: &ContractId) {
        if let Ok(mut timers) = self.timers.lock()
            && let Some(handle) = timers.remove(id)
        {
            handle.abort();
        }
    }

    /// Number of confirmation timers still pending.
    pub fn pending_confirmations(&self) -> usize {
        self.timers.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// Stop the oracle poller and every pending confirmation. Later
    /// operations fail with [`NodeError::ShutDown`].
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.abort_all();
        log::info!("node: shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn abort_all(&self) {
        if let Ok(mut poller) = self.poller.lock()
            && let Some(handle) = poller.take()
        {
            handle.abort();
        }
        if let Ok(mut timers) = self.timers.lock() {
            for (_, handle) in timers.drain() {
                handle.abort();
            }
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<ContractEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn store(&self) -> &ContractStore<S> {
        &self.store
    }

    pub fn feed(&self) -> &OracleFeed {
        &self.feed
    }
}

impl<S: ContractPersistence> Drop for DlcNode<S> {
    fn drop(&mut self) {
        self.abort_all();
    }
}

fn apply_observation<S: ContractPersistence>(
    store: &ContractStore<S>,
    events: &broadcast::Sender<ContractEvent>,
    observation: PriceObservation,
) {
    store.observe_price(observation.price);
    let _ = events.send(ContractEvent::PriceObserved(observation));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        FixedInputSelector, FixedPriceSource, ManualClock, MockBroadcaster, MockSigner, alice,
        bob, price_oracle, test_terms,
    };

    fn collaborators(clock: Arc<ManualClock>) -> Collaborators {
        Collaborators {
            inputs: Arc::new(FixedInputSelector::default()),
            signer: Arc::new(MockSigner),
            broadcaster: Arc::new(MockBroadcaster::default()),
            clock,
        }
    }

    fn fast_config() -> NodeConfig {
        NodeConfig {
            poll_interval: Duration::from_millis(20),
            confirmation_delay: Duration::from_millis(20),
            event_capacity: 64,
        }
    }

    #[test]
    fn default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.confirmation_delay, Duration::from_secs(5));
        assert_eq!(config.event_capacity, 256);
    }

    #[tokio::test]
    async fn record_price_updates_feed_and_contracts() {
        let clock = Arc::new(ManualClock::default());
        let (node, mut rx) = DlcNode::new(collaborators(clock.clone()), fast_config());
        let c = node
            .create_contract(test_terms(), alice(), bob(), price_oracle(), chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(matches!(rx.recv().await.unwrap(), ContractEvent::Created(_)));

        let obs = node.record_price(Price::from_dollars(30_200)).unwrap();
        assert_eq!(node.current_price(), Some(obs));
        assert_eq!(node.get(&c.id).unwrap().current_price, Price::from_dollars(30_200));
        assert!(matches!(rx.recv().await.unwrap(), ContractEvent::PriceObserved(_)));

        // same timestamp is not strictly newer
        assert!(node.record_price(Price::from_dollars(1)).is_none());
        clock.advance(chrono::Duration::seconds(5));
        assert!(node.record_price(Price::from_dollars(1)).is_some());
    }

    #[tokio::test]
    async fn operations_fail_after_shutdown() {
        let (node, _rx) = DlcNode::new(
            collaborators(Arc::new(ManualClock::default())),
            fast_config(),
        );
        node.start_oracle(Arc::new(FixedPriceSource::new(Price::from_dollars(30_000))))
            .unwrap();
        node.shutdown();
        assert!(node.is_shut_down());
        let err = node
            .create_contract(test_terms(), alice(), bob(), price_oracle(), chrono::Duration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::ShutDown));
        assert!(matches!(
            node.start_oracle(Arc::new(FixedPriceSource::new(Price::from_dollars(1)))),
            Err(NodeError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn contract_errors_surface_as_node_errors() {
        let (node, _rx) = DlcNode::new(
            collaborators(Arc::new(ManualClock::default())),
            fast_config(),
        );
        let missing = ContractId([7; 32]);
        let err = node.broadcast(&missing).await.unwrap_err();
        assert!(matches!(err, NodeError::Contract(Error::NotFound(id)) if id == missing));
        assert_eq!(node.pending_confirmations(), 0);
    }
}
