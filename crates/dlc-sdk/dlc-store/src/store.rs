use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use dlc_sdk::{Contract, ContractId, ContractStatus, ParticipantId};

use crate::conversions::{new_contract_row, status_to_i32};
use crate::error::StoreError;
use crate::models::ContractRow;
use crate::schema::contracts;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// SQL expression for SQLite's `datetime('now')`.
const DATETIME_NOW: &str = "datetime('now')";

// --- Public types ---

#[derive(Debug, Clone, Default)]
pub struct ContractFilter {
    pub status: Option<ContractStatus>,
    /// Contracts where this participant is on either side.
    pub participant: Option<ParticipantId>,
    pub limit: Option<i64>,
}

/// SQLite-backed contract store.
///
/// All methods take `&mut self` because Diesel's `SqliteConnection` requires
/// `&mut` for all operations, including reads.
pub struct DlcStore {
    conn: SqliteConnection,
}

impl DlcStore {
    /// Open (or create) a store at the given file path. Runs migrations automatically.
    pub fn open(path: &str) -> crate::Result<Self> {
        Self::establish(path)
    }

    /// Open an in-memory store for tests.
    pub fn open_in_memory() -> crate::Result<Self> {
        Self::establish(":memory:")
    }

    fn establish(url: &str) -> crate::Result<Self> {
        let mut conn = SqliteConnection::establish(url)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(DlcStore { conn })
    }

    // ==================== Writes ====================

    /// Insert a new contract or replace the stored copy of an existing one.
    /// New contracts are appended after every stored contract; updates keep
    /// their original position.
    pub fn save_contract(&mut self, contract: &Contract) -> crate::Result<()> {
        let id_bytes = contract.id.as_bytes().to_vec();
        self.conn.transaction(|conn| {
            let existing: Option<i64> = contracts::table
                .filter(contracts::contract_id.eq(&id_bytes))
                .select(contracts::sequence)
                .first(conn)
                .optional()?;

            match existing {
                Some(sequence) => {
                    let row = new_contract_row(contract, sequence)?;
                    diesel::update(contracts::table.filter(contracts::contract_id.eq(&id_bytes)))
                        .set((
                            contracts::status.eq(row.status),
                            contracts::tx_status.eq(row.tx_status),
                            contracts::body.eq(row.body),
                            contracts::updated_at
                                .eq(diesel::dsl::sql::<diesel::sql_types::Text>(DATETIME_NOW)),
                        ))
                        .execute(conn)?;
                }
                None => {
                    let last: Option<i64> = contracts::table
                        .select(diesel::dsl::max(contracts::sequence))
                        .first(conn)?;
                    let row = new_contract_row(contract, last.map_or(0, |s| s + 1))?;
                    diesel::insert_into(contracts::table)
                        .values(&row)
                        .execute(conn)?;
                }
            }
            Ok::<_, StoreError>(())
        })
    }

    /// Returns `true` if a row was deleted.
    pub fn delete_contract(&mut self, id: &ContractId) -> crate::Result<bool> {
        let n = diesel::delete(
            contracts::table.filter(contracts::contract_id.eq(id.as_bytes().to_vec())),
        )
        .execute(&mut self.conn)?;
        Ok(n > 0)
    }

    // ==================== Queries ====================

    pub fn get_contract(&mut self, id: &ContractId) -> crate::Result<Option<Contract>> {
        let row: Option<ContractRow> = contracts::table
            .filter(contracts::contract_id.eq(id.as_bytes().to_vec()))
            .select(ContractRow::as_select())
            .first(&mut self.conn)
            .optional()?;

        row.as_ref().map(Contract::try_from).transpose()
    }

    /// Stored contracts in creation order.
    pub fn list_contracts(&mut self, filter: &ContractFilter) -> crate::Result<Vec<Contract>> {
        let mut query = contracts::table
            .select(ContractRow::as_select())
            .order(contracts::sequence.asc())
            .into_boxed();

        if let Some(status) = filter.status {
            query = query.filter(contracts::status.eq(status_to_i32(status)));
        }
        if let Some(ref participant) = filter.participant {
            let pid = participant.as_str().to_string();
            query = query.filter(
                contracts::participant1_id
                    .eq(pid.clone())
                    .or(contracts::participant2_id.eq(pid)),
            );
        }
        if let Some(lim) = filter.limit {
            query = query.limit(lim);
        }

        let rows: Vec<ContractRow> = query.load(&mut self.conn)?;
        rows.iter().map(Contract::try_from).collect()
    }

    pub fn contract_count(&mut self) -> crate::Result<i64> {
        Ok(contracts::table.count().get_result(&mut self.conn)?)
    }
}

// ==================== ContractPersistence trait impl ====================

impl dlc_sdk::ContractPersistence for DlcStore {
    fn save_contract(&mut self, contract: &Contract) -> Result<(), String> {
        DlcStore::save_contract(self, contract).map_err(|e| format!("{e}"))
    }

    fn remove_contract(&mut self, id: &ContractId) -> Result<(), String> {
        self.delete_contract(id)
            .map(|removed| {
                if !removed {
                    log::debug!("contract {id}: nothing to remove");
                }
            })
            .map_err(|e| format!("{e}"))
    }

    fn load_contracts(&mut self) -> Result<Vec<Contract>, String> {
        self.list_contracts(&ContractFilter::default())
            .map_err(|e| format!("{e}"))
    }
}
