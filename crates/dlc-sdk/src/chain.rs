use crate::error::Result;
use crate::params::{Amount, Participant};
use crate::transaction::{BitcoinInput, BroadcastAck, SerializedTx};

/// Supplies the collateral-locking input for one participant.
pub trait InputSelector: Send + Sync {
    /// Select an input owned by `owner` that locks exactly `amount`.
    fn select_input(&self, owner: &Participant, amount: Amount) -> Result<BitcoinInput>;
}

/// Hands a finalized transaction to the network.
///
/// Confirmation is reported separately through
/// [`SigningCoordinator::confirm`](crate::signing::SigningCoordinator::confirm).
pub trait BroadcastService: Send + Sync {
    fn broadcast(&self, tx: &SerializedTx) -> Result<BroadcastAck>;
}
