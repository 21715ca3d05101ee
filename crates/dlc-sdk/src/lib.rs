pub mod chain;
pub mod clock;
pub mod contract;
pub mod error;
pub mod events;
pub mod execution;
pub mod node;
pub mod oracle;
pub mod params;
pub mod signing;
pub mod state;
pub mod store;
pub mod store_trait;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transaction;

// Core types
pub use contract::{Contract, FinalPayout, Side};
pub use error::{Error, NodeError, Result};
pub use params::{
    Amount, ContractId, ContractTerms, Oracle, Participant, ParticipantId, Price, SATS_PER_BTC,
};
pub use state::{ContractStatus, TransactionStatus};
pub use transaction::{
    BitcoinInput, BroadcastAck, SerializedTx, Signature, SigningArtifact, Transaction, TxId,
    WitnessUtxo,
};

// Components
pub use execution::{ExecutionEngine, Settlement, resolve_outcome};
pub use signing::{SignOutcome, SigningCoordinator, SigningService};
pub use store::ContractStore;
pub use store_trait::{ContractPersistence, NoopStore};

// Collaborators
pub use chain::{BroadcastService, InputSelector};
pub use clock::{Clock, SystemClock};
pub use oracle::{OracleFeed, PriceObservation, PriceSource, RandomWalkSource};

// Node
pub use events::ContractEvent;
pub use node::{Collaborators, DlcNode, NodeConfig};
