use crate::params::{ContractId, ParticipantId};
use crate::state::ContractStatus;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid contract terms: {0}")]
    InvalidTerms(String),

    #[error("contract {0} not found")]
    NotFound(ContractId),

    #[error("invalid contract transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ContractStatus,
        to: ContractStatus,
    },

    #[error("participant {0} is not bound to this contract")]
    UnknownParticipant(ParticipantId),

    #[error("participant {0} has already signed")]
    AlreadySigned(ParticipantId),

    #[error("transaction is not accepting signatures")]
    TransactionNotOpen,

    #[error("transaction is not ready for broadcast")]
    NotReady,

    #[error("transaction has not been broadcast")]
    NotBroadcast,

    #[error("contract is not executable")]
    NotExecutable,

    #[error("contract has already been executed")]
    AlreadyExecuted,

    #[error("contract {0} has expired")]
    ContractExpired(ContractId),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("signer error: {0}")]
    Signer(String),

    #[error("broadcast error: {0}")]
    Broadcast(String),

    #[error("input selection error: {0}")]
    InputSelection(String),

    #[error("price feed error: {0}")]
    PriceFeed(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("contract lock poisoned by a prior panic")]
    LockPoisoned,
}

impl Error {
    /// Errors a timer callback may hit because the contract moved on or
    /// disappeared before the timer fired.
    pub fn is_stale_race(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::NotBroadcast
                | Error::AlreadyExecuted
                | Error::ContractExpired(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by [`DlcNode`](crate::node::DlcNode) operations.
#[derive(Debug)]
pub enum NodeError {
    /// A contract operation failed.
    Contract(Error),
    /// The persistence store failed.
    Store(String),
    /// A `spawn_blocking` task failed to join.
    Task(String),
    /// The node has been shut down.
    ShutDown,
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::Contract(e) => write!(f, "contract error: {e}"),
            NodeError::Store(e) => write!(f, "store error: {e}"),
            NodeError::Task(e) => write!(f, "task join error: {e}"),
            NodeError::ShutDown => write!(f, "node has been shut down"),
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NodeError::Contract(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Error> for NodeError {
    fn from(e: Error) -> Self {
        NodeError::Contract(e)
    }
}
