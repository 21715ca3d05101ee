use diesel::prelude::*;

use crate::schema::contracts;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = contracts)]
pub struct ContractRow {
    pub contract_id: Vec<u8>,
    pub sequence: i64,
    pub status: i32,
    pub tx_status: Option<i32>,
    pub participant1_id: String,
    pub participant2_id: String,
    pub target_price: i64,
    pub collateral: i64,
    pub created_at: String,
    pub expires_at: String,
    pub body: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = contracts)]
pub struct NewContractRow {
    pub contract_id: Vec<u8>,
    pub sequence: i64,
    pub status: i32,
    pub tx_status: Option<i32>,
    pub participant1_id: String,
    pub participant2_id: String,
    pub target_price: i64,
    pub collateral: i64,
    pub created_at: String,
    pub expires_at: String,
    pub body: String,
}
