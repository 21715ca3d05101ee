use crate::contract::Contract;
use crate::oracle::PriceObservation;
use crate::params::{ContractId, ParticipantId};

/// Events emitted by `DlcNode` after each committed change.
#[derive(Debug, Clone)]
pub enum ContractEvent {
    /// A contract was registered with its unsigned funding transaction.
    Created(Contract),
    /// One participant signed.
    Signed {
        contract: Contract,
        participant: ParticipantId,
    },
    /// Both signatures are in; the contract is active.
    Ready(Contract),
    Broadcast(Contract),
    Confirmed(Contract),
    Executed(Contract),
    Cancelled(Contract),
    Removed(ContractId),
    /// The oracle feed accepted a new observation.
    PriceObserved(PriceObservation),
}

impl ContractEvent {
    /// The contract this event concerns, if any.
    pub fn contract_id(&self) -> Option<ContractId> {
        match self {
            ContractEvent::Created(c)
            | ContractEvent::Signed { contract: c, .. }
            | ContractEvent::Ready(c)
            | ContractEvent::Broadcast(c)
            | ContractEvent::Confirmed(c)
            | ContractEvent::Executed(c)
            | ContractEvent::Cancelled(c) => Some(c.id),
            ContractEvent::Removed(id) => Some(*id),
            ContractEvent::PriceObserved(_) => None,
        }
    }
}
