use serde::{Deserialize, Serialize};

use dlc_sdk::{Contract, ContractId, ContractTerms, ParticipantId, Price};

use crate::state::AppStateManager;
use crate::views::{AppState, ContractView, PriceView};

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContractRequest {
    pub target_price_cents: u64,
    pub collateral_sats: u64,
    pub duration_hours: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRef {
    pub contract_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub contract_id: String,
    pub participant_id: String,
}

/// One client request: `{"command": "...", "args": {...}}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum Command {
    CreateContract(CreateContractRequest),
    SignContract(SignRequest),
    BroadcastContract(ContractRef),
    ExecuteContract(ContractRef),
    CancelContract(ContractRef),
    GetContract(ContractRef),
    ListContracts,
    GetOraclePrice,
    GetAppState,
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_id(raw: &str) -> Result<ContractId, String> {
    ContractId::from_hex(raw.trim()).map_err(|e| e.to_string())
}

fn validate_request(request: &CreateContractRequest, mgr: &AppStateManager) -> Result<(), String> {
    let config = mgr.config();
    if request.target_price_cents == 0 {
        return Err("target price must be > 0".to_string());
    }
    if request.collateral_sats == 0 {
        return Err("collateral must be > 0".to_string());
    }
    if request.duration_hours < config.min_duration_hours
        || request.duration_hours > config.max_duration_hours
    {
        return Err(format!(
            "duration must be {}-{} hours",
            config.min_duration_hours, config.max_duration_hours
        ));
    }
    Ok(())
}

fn view(mgr: &AppStateManager, contract: &Contract) -> ContractView {
    mgr.bump_revision();
    mgr.contract_view(contract)
}

// ============================================================================
// Contract commands
// ============================================================================

pub async fn create_contract(
    request: CreateContractRequest,
    mgr: &AppStateManager,
) -> Result<ContractView, String> {
    validate_request(&request, mgr)?;
    let config = mgr.config();
    let terms = ContractTerms::winner_takes_all(
        Price(request.target_price_cents),
        request.collateral_sats,
        Price(config.price_threshold_cents),
    );
    let contract = mgr
        .node()
        .create_contract(
            terms,
            config.participant1.to_participant(),
            config.participant2.to_participant(),
            config.oracle(),
            chrono::Duration::hours(i64::from(request.duration_hours)),
        )
        .await
        .map_err(|e| e.to_string())?;
    Ok(view(mgr, &contract))
}

pub async fn sign_contract(
    request: SignRequest,
    mgr: &AppStateManager,
) -> Result<ContractView, String> {
    let id = parse_id(&request.contract_id)?;
    let participant = ParticipantId::new(request.participant_id);
    let outcome = mgr
        .node()
        .sign(&id, &participant)
        .await
        .map_err(|e| e.to_string())?;
    Ok(view(mgr, &outcome.contract))
}

pub async fn broadcast_contract(
    request: ContractRef,
    mgr: &AppStateManager,
) -> Result<ContractView, String> {
    let id = parse_id(&request.contract_id)?;
    let contract = mgr.node().broadcast(&id).await.map_err(|e| e.to_string())?;
    Ok(view(mgr, &contract))
}

/// Settle at the latest oracle price.
pub async fn execute_contract(
    request: ContractRef,
    mgr: &AppStateManager,
) -> Result<ContractView, String> {
    let id = parse_id(&request.contract_id)?;
    let contract = mgr
        .node()
        .execute_at_current_price(&id)
        .await
        .map_err(|e| e.to_string())?;
    Ok(view(mgr, &contract))
}

pub async fn cancel_contract(
    request: ContractRef,
    mgr: &AppStateManager,
) -> Result<ContractView, String> {
    let id = parse_id(&request.contract_id)?;
    let contract = mgr.node().cancel(&id).await.map_err(|e| e.to_string())?;
    Ok(view(mgr, &contract))
}

pub fn get_contract(request: ContractRef, mgr: &AppStateManager) -> Result<ContractView, String> {
    let id = parse_id(&request.contract_id)?;
    let contract = mgr.node().get(&id).map_err(|e| e.to_string())?;
    Ok(mgr.contract_view(&contract))
}

pub fn list_contracts(mgr: &AppStateManager) -> Result<Vec<ContractView>, String> {
    let now = mgr.now();
    Ok(mgr
        .node()
        .list()
        .map_err(|e| e.to_string())?
        .iter()
        .map(|c| ContractView::new(c, now))
        .collect())
}

pub fn get_oracle_price(mgr: &AppStateManager) -> Result<PriceView, String> {
    mgr.node()
        .current_price()
        .as_ref()
        .map(PriceView::from)
        .ok_or_else(|| "no oracle price observed yet".to_string())
}

pub fn get_app_state(mgr: &AppStateManager) -> Result<AppState, String> {
    mgr.snapshot()
}

// ============================================================================
// Dispatch
// ============================================================================

fn to_value<T: Serialize>(value: T) -> Result<serde_json::Value, String> {
    serde_json::to_value(value).map_err(|e| format!("failed to encode response: {e}"))
}

pub async fn dispatch(
    command: Command,
    mgr: &AppStateManager,
) -> Result<serde_json::Value, String> {
    match command {
        Command::CreateContract(req) => to_value(create_contract(req, mgr).await?),
        Command::SignContract(req) => to_value(sign_contract(req, mgr).await?),
        Command::BroadcastContract(req) => to_value(broadcast_contract(req, mgr).await?),
        Command::ExecuteContract(req) => to_value(execute_contract(req, mgr).await?),
        Command::CancelContract(req) => to_value(cancel_contract(req, mgr).await?),
        Command::GetContract(req) => to_value(get_contract(req, mgr)?),
        Command::ListContracts => to_value(list_contracts(mgr)?),
        Command::GetOraclePrice => to_value(get_oracle_price(mgr)?),
        Command::GetAppState => to_value(get_app_state(mgr)?),
    }
}

/// Parse one request line, run it and build the response. The optional
/// top-level `id` is echoed back.
pub async fn handle_line(line: &str, mgr: &AppStateManager) -> Response {
    let mut value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Response::failure(None, format!("invalid JSON: {e}")),
    };
    let id = value.as_object_mut().and_then(|m| m.remove("id"));
    let command: Command = match serde_json::from_value(value) {
        Ok(c) => c,
        Err(e) => return Response::failure(id, format!("invalid command: {e}")),
    };
    log::debug!("command: {command:?}");
    match dispatch(command, mgr).await {
        Ok(data) => Response {
            id,
            ok: true,
            data: Some(data),
            error: None,
        },
        Err(e) => {
            log::info!("command failed: {e}");
            Response::failure(id, e)
        }
    }
}

impl Response {
    fn failure(id: Option<serde_json::Value>, error: String) -> Self {
        Self {
            id,
            ok: false,
            data: None,
            error: Some(error),
        }
    }
}
