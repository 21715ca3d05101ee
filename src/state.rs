use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dlc_sdk::{
    Collaborators, ContractEvent, DlcNode, NodeConfig, NodeError, Oracle, Participant,
    ParticipantId, Price, RandomWalkSource, SATS_PER_BTC, SystemClock,
};
use dlc_store::{DlcStore, StoreError};

use crate::simulated::{SimulatedBroadcaster, SimulatedSigner, SimulatedWallet};
use crate::views::{AppState, ContractView, PriceView};

const CONFIG_FILE: &str = "dlc_config.json";
const DB_FILE: &str = "dlc.sqlite";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to create {}: {source}", path.display())]
    DataDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("non-UTF-8 data directory: {}", .0.display())]
    NonUtf8Path(PathBuf),

    #[error("failed to open store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Node(#[from] NodeError),
}

// ============================================================================
// Persisted configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantConfig {
    pub id: String,
    pub name: String,
    pub public_key: String,
    pub balance_sats: u64,
}

impl ParticipantConfig {
    pub fn to_participant(&self) -> Participant {
        Participant {
            id: ParticipantId::new(self.id.clone()),
            name: self.name.clone(),
            public_key: self.public_key.clone(),
            balance: self.balance_sats,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub participant1: ParticipantConfig,
    pub participant2: ParticipantConfig,
    pub oracle_name: String,
    pub oracle_public_key: String,
    pub initial_price_cents: u64,
    pub price_threshold_cents: u64,
    pub min_duration_hours: u32,
    pub max_duration_hours: u32,
    pub poll_interval_secs: u64,
    pub confirmation_delay_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            participant1: ParticipantConfig {
                id: "1".into(),
                name: "Alice".into(),
                public_key: "02abc...123".into(),
                balance_sats: SATS_PER_BTC + SATS_PER_BTC / 2,
            },
            participant2: ParticipantConfig {
                id: "2".into(),
                name: "Bob".into(),
                public_key: "03def...456".into(),
                balance_sats: 2 * SATS_PER_BTC,
            },
            oracle_name: "Price Oracle".into(),
            oracle_public_key: "02xyz...789".into(),
            initial_price_cents: Price::from_dollars(30_000).cents(),
            price_threshold_cents: Price::from_dollars(100).cents(),
            min_duration_hours: 1,
            max_duration_hours: 168,
            poll_interval_secs: 5,
            confirmation_delay_secs: 5,
        }
    }
}

impl AppConfig {
    pub fn oracle(&self) -> Oracle {
        Oracle {
            name: self.oracle_name.clone(),
            public_key: self.oracle_public_key.clone(),
        }
    }

    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            confirmation_delay: Duration::from_secs(self.confirmation_delay_secs),
            ..Default::default()
        }
    }

    fn load(dir: &Path) -> Option<Self> {
        let contents = fs::read_to_string(dir.join(CONFIG_FILE)).ok()?;
        match serde_json::from_str(&contents) {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("ignoring unreadable {CONFIG_FILE}: {e}");
                None
            }
        }
    }

    fn save(&self, dir: &Path) {
        let path = dir.join(CONFIG_FILE);
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(&path, json) {
                    log::warn!("failed to write {}: {e}", path.display());
                }
            }
            Err(e) => log::warn!("failed to encode config: {e}"),
        }
    }
}

// ============================================================================
// App state manager
// ============================================================================

pub struct AppStateManager {
    data_dir: PathBuf,
    config: AppConfig,
    node: DlcNode<DlcStore>,
    revision: Arc<AtomicU64>,
}

impl AppStateManager {
    /// Load (or create) the config in `data_dir`, open the contract database
    /// and restore every stored contract.
    pub fn open(data_dir: PathBuf) -> Result<Self, StateError> {
        fs::create_dir_all(&data_dir).map_err(|source| StateError::DataDir {
            path: data_dir.clone(),
            source,
        })?;

        let config = match AppConfig::load(&data_dir) {
            Some(config) => config,
            None => {
                log::info!("first launch: writing default {CONFIG_FILE}");
                let config = AppConfig::default();
                config.save(&data_dir);
                config
            }
        };

        let db_path = data_dir.join(DB_FILE);
        let db_path = db_path
            .to_str()
            .ok_or_else(|| StateError::NonUtf8Path(data_dir.clone()))?;
        let store = DlcStore::open(db_path)?;

        let collaborators = Collaborators {
            inputs: Arc::new(SimulatedWallet::default()),
            signer: Arc::new(SimulatedSigner),
            broadcaster: Arc::new(SimulatedBroadcaster),
            clock: Arc::new(SystemClock),
        };
        let (node, _rx) = DlcNode::with_store(
            collaborators,
            Arc::new(Mutex::new(store)),
            config.node_config(),
        )?;
        log::info!(
            "opened {} with {} contracts",
            data_dir.display(),
            node.store().len()
        );

        Ok(Self {
            data_dir,
            config,
            node,
            revision: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Seed the oracle with the configured price and start polling. Must be
    /// called from within a tokio runtime.
    pub fn start(&self) -> Result<(), StateError> {
        let initial = Price(self.config.initial_price_cents);
        self.node.record_price(initial);
        self.node.start_oracle(Arc::new(RandomWalkSource::new(initial)))?;
        self.node.resume_confirmations()?;

        // Commands bump the revision themselves; only background changes
        // are counted here.
        let mut events = self.node.subscribe();
        let revision = self.revision.clone();
        tokio::spawn(async move {
            use tokio::sync::broadcast::error::RecvError;
            loop {
                match events.recv().await {
                    Ok(event) if is_background(&event) => {
                        revision.fetch_add(1, Ordering::AcqRel);
                        log::debug!("background event: {:?}", event.contract_id());
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        revision.fetch_add(n, Ordering::AcqRel);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }

    pub fn shutdown(&self) {
        self.node.shutdown();
    }

    pub fn node(&self) -> &DlcNode<DlcStore> {
        &self.node
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn bump_revision(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.node.store().now()
    }

    pub fn contract_view(&self, contract: &dlc_sdk::Contract) -> ContractView {
        ContractView::new(contract, self.now())
    }

    pub fn snapshot(&self) -> Result<AppState, String> {
        let now = self.now();
        let contracts = self
            .node
            .list()
            .map_err(|e| e.to_string())?
            .iter()
            .map(|c| ContractView::new(c, now))
            .collect();
        Ok(AppState {
            revision: self.revision(),
            oracle_price: self.node.current_price().as_ref().map(PriceView::from),
            contracts,
        })
    }
}

/// Events raised by the oracle poller or a confirmation timer rather than
/// by a command.
fn is_background(event: &ContractEvent) -> bool {
    matches!(
        event,
        ContractEvent::PriceObserved(_) | ContractEvent::Confirmed(_)
    )
}
