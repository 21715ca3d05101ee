pub mod commands;
pub mod simulated;
pub mod state;
pub mod views;

use std::path::PathBuf;
use std::sync::Arc;

use dlc_sdk::ContractEvent;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::state::AppStateManager;
use crate::views::PriceView;

/// Environment variable naming the data directory.
pub const DATA_DIR_ENV: &str = "DLC_DATA_DIR";
const DEFAULT_DATA_DIR: &str = "./dlc-data";

const APP_STATE_UPDATED_EVENT: &str = "app_state_updated";
const ORACLE_PRICE_EVENT: &str = "oracle_price";

// ============================================================================
// Logging
// ============================================================================

fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    let _ = env_logger::Builder::from_env(env)
        .filter_module("diesel", log::LevelFilter::Warn)
        .filter_module("dlc_sdk::oracle", log::LevelFilter::Info)
        .target(env_logger::Target::Stderr)
        .try_init();
}

pub fn data_dir() -> PathBuf {
    std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

// ============================================================================
// Notifications
// ============================================================================

/// Line pushed to the client when background work changes state.
fn notification(event: &ContractEvent, mgr: &AppStateManager) -> Option<String> {
    let (name, data) = match event {
        ContractEvent::PriceObserved(obs) => {
            (ORACLE_PRICE_EVENT, serde_json::to_value(PriceView::from(obs)).ok()?)
        }
        ContractEvent::Confirmed(contract) => (
            APP_STATE_UPDATED_EVENT,
            serde_json::json!({
                "revision": mgr.revision(),
                "contract": mgr.contract_view(contract),
            }),
        ),
        _ => return None,
    };
    serde_json::to_string(&serde_json::json!({ "event": name, "data": data })).ok()
}

// ============================================================================
// Command loop
// ============================================================================

/// Serve JSON-lines commands from stdin until EOF.
pub async fn serve(mgr: Arc<AppStateManager>) -> Result<(), String> {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(mut line) = out_rx.recv().await {
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err()
            {
                log::warn!("stdout closed");
                break;
            }
        }
    });

    let mut events = mgr.node().subscribe();
    let notify_tx = out_tx.clone();
    let notify_mgr = mgr.clone();
    let notifier = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let Some(line) = notification(&event, &notify_mgr) {
                let _ = notify_tx.send(line);
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("stdin read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = commands::handle_line(&line, &mgr).await;
        let encoded = serde_json::to_string(&response)
            .map_err(|e| format!("failed to encode response: {e}"))?;
        if out_tx.send(encoded).is_err() {
            break;
        }
    }

    log::info!("stdin closed, shutting down");
    mgr.shutdown();
    notifier.abort();
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

// ============================================================================
// App Entry Point
// ============================================================================

pub fn run() {
    init_logging();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async {
        let mgr = Arc::new(AppStateManager::open(data_dir()).map_err(|e| e.to_string())?);
        mgr.start().map_err(|e| e.to_string())?;
        serve(mgr).await
    });

    if let Err(e) = result {
        log::error!("{e}");
        std::process::exit(1);
    }
}
