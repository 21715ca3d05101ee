use dlc_sdk::{Contract, ContractId, ContractStatus, TransactionStatus};

use crate::error::StoreError;
use crate::models::{ContractRow, NewContractRow};

pub fn vec_to_array32(v: &[u8], field: &str) -> std::result::Result<[u8; 32], StoreError> {
    v.try_into().map_err(|_| {
        StoreError::InvalidData(format!("{field}: expected 32 bytes, got {}", v.len()))
    })
}

pub fn u64_to_i64(v: u64, field: &str) -> std::result::Result<i64, StoreError> {
    i64::try_from(v).map_err(|_| StoreError::InvalidData(format!("{field}: {v} out of range")))
}

pub fn status_to_i32(status: ContractStatus) -> i32 {
    status.as_u64() as i32
}

pub fn status_from_i32(v: i32) -> std::result::Result<ContractStatus, StoreError> {
    u64::try_from(v)
        .ok()
        .and_then(ContractStatus::from_u64)
        .ok_or_else(|| StoreError::InvalidData(format!("invalid contract status: {v}")))
}

pub fn tx_status_to_i32(status: TransactionStatus) -> i32 {
    status.as_u64() as i32
}

// --- SDK types -> rows ---

pub fn new_contract_row(
    contract: &Contract,
    sequence: i64,
) -> std::result::Result<NewContractRow, StoreError> {
    Ok(NewContractRow {
        contract_id: contract.id.as_bytes().to_vec(),
        sequence,
        status: status_to_i32(contract.status),
        tx_status: contract
            .transaction
            .as_ref()
            .map(|tx| tx_status_to_i32(tx.status)),
        participant1_id: contract.participant1.id.as_str().to_string(),
        participant2_id: contract.participant2.id.as_str().to_string(),
        target_price: u64_to_i64(contract.terms.target_price.cents(), "target_price")?,
        collateral: u64_to_i64(contract.terms.collateral, "collateral")?,
        created_at: contract.created_at.to_rfc3339(),
        expires_at: contract.expires_at.to_rfc3339(),
        body: serde_json::to_string(contract)?,
    })
}

// --- Rows -> SDK types ---

impl TryFrom<&ContractRow> for ContractId {
    type Error = StoreError;

    fn try_from(row: &ContractRow) -> std::result::Result<Self, Self::Error> {
        Ok(ContractId(vec_to_array32(&row.contract_id, "contract_id")?))
    }
}

impl TryFrom<&ContractRow> for Contract {
    type Error = StoreError;

    /// Decode the JSON body and check it against the indexed columns.
    fn try_from(row: &ContractRow) -> std::result::Result<Self, Self::Error> {
        let id = ContractId::try_from(row)?;
        let contract: Contract = serde_json::from_str(&row.body)?;
        if contract.id != id {
            return Err(StoreError::InvalidData(format!(
                "row {id} holds body for contract {}",
                contract.id
            )));
        }
        let status = status_from_i32(row.status)?;
        if contract.status != status {
            return Err(StoreError::InvalidData(format!(
                "contract {id}: status column {status:?} disagrees with body {:?}",
                contract.status
            )));
        }
        let tx_status = contract
            .transaction
            .as_ref()
            .map(|tx| tx_status_to_i32(tx.status));
        if tx_status != row.tx_status {
            return Err(StoreError::InvalidData(format!(
                "contract {id}: transaction status column disagrees with body"
            )));
        }
        Ok(contract)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            ContractStatus::Pending,
            ContractStatus::Active,
            ContractStatus::Executed,
            ContractStatus::Cancelled,
            ContractStatus::Expired,
        ] {
            assert_eq!(status_from_i32(status_to_i32(status)).unwrap(), status);
        }
        assert!(status_from_i32(-1).is_err());
        assert!(status_from_i32(99).is_err());
    }

    #[test]
    fn oversized_amounts_are_rejected() {
        assert_eq!(u64_to_i64(21, "x").unwrap(), 21);
        assert!(u64_to_i64(u64::MAX, "x").is_err());
    }

    #[test]
    fn wrong_length_id_is_rejected() {
        assert!(vec_to_array32(&[0u8; 31], "contract_id").is_err());
        assert_eq!(vec_to_array32(&[7u8; 32], "contract_id").unwrap(), [7u8; 32]);
    }
}
