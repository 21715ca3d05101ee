use crate::contract::Contract;
use crate::params::ContractId;

/// Trait abstracting the persistence operations needed by `ContractStore`.
///
/// This avoids a circular dependency between `dlc-sdk` and `dlc-store`.
/// The `dlc-store` crate implements this trait for `DlcStore`.
pub trait ContractPersistence: Send + 'static {
    /// Insert or replace the stored copy of a contract.
    fn save_contract(&mut self, contract: &Contract) -> Result<(), String>;

    /// Forget a contract. Removing an unknown id is a no-op.
    fn remove_contract(&mut self, id: &ContractId) -> Result<(), String>;

    /// All stored contracts in creation order.
    fn load_contracts(&mut self) -> Result<Vec<Contract>, String>;
}

/// Persistence that keeps nothing.
#[derive(Debug, Default)]
pub struct NoopStore;

impl ContractPersistence for NoopStore {
    fn save_contract(&mut self, _contract: &Contract) -> Result<(), String> {
        Ok(())
    }

    fn remove_contract(&mut self, _id: &ContractId) -> Result<(), String> {
        Ok(())
    }

    fn load_contracts(&mut self) -> Result<Vec<Contract>, String> {
        Ok(vec![])
    }
}
