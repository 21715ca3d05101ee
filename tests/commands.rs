use std::time::Duration;

use dlc_lib::commands::handle_line;
use dlc_lib::state::AppStateManager;
use serde_json::Value;

async fn open_manager(dir: &std::path::Path) -> AppStateManager {
    std::fs::write(
        dir.join("dlc_config.json"),
        r#"{
            "confirmationDelaySecs": 0,
            "pollIntervalSecs": 3600,
            "initialPriceCents": 3000000,
            "priceThresholdCents": 1000000
        }"#,
    )
    .unwrap();
    let mgr = AppStateManager::open(dir.to_path_buf()).unwrap();
    mgr.start().unwrap();
    mgr
}

async fn call(mgr: &AppStateManager, line: &str) -> Value {
    let response = handle_line(line, mgr).await;
    serde_json::to_value(response).unwrap()
}

async fn ok(mgr: &AppStateManager, line: &str) -> Value {
    let response = call(mgr, line).await;
    assert_eq!(response["ok"], true, "command failed: {response}");
    response["data"].clone()
}

async fn wait_for_confirmation(mgr: &AppStateManager, id: &str) -> Value {
    let line = format!(r#"{{"command":"get_contract","args":{{"contractId":"{id}"}}}}"#);
    for _ in 0..100 {
        let contract = ok(mgr, &line).await;
        if contract["transaction"]["status"] == "confirmed" {
            return contract;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("contract {id} never confirmed");
}

#[tokio::test(flavor = "multi_thread")]
async fn full_lifecycle_over_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = open_manager(dir.path()).await;

    let created = ok(
        &mgr,
        r#"{"command":"create_contract","args":{"targetPriceCents":3000000,"collateralSats":10000000,"durationHours":24}}"#,
    )
    .await;
    assert_eq!(created["status"], "pending");
    assert_eq!(created["transaction"]["status"], "pending_signatures");
    assert_eq!(created["terms"]["outcome1PayoutSats"], 20_000_000);
    assert_eq!(created["participant1"]["name"], "Alice");
    let id = created["id"].as_str().unwrap().to_string();

    let signed = ok(
        &mgr,
        &format!(r#"{{"command":"sign_contract","args":{{"contractId":"{id}","participantId":"1"}}}}"#),
    )
    .await;
    assert_eq!(signed["status"], "pending");
    assert!(signed["transaction"]["signatures"][0]["artifact"].is_string());
    assert!(signed["transaction"]["signatures"][1]["artifact"].is_null());
    assert!(signed["transaction"]["serializedTx"].is_null());

    let signed = ok(
        &mgr,
        &format!(r#"{{"command":"sign_contract","args":{{"contractId":"{id}","participantId":"2"}}}}"#),
    )
    .await;
    assert_eq!(signed["status"], "active");
    assert_eq!(signed["transaction"]["status"], "ready");
    let serialized = signed["transaction"]["serializedTx"].as_str().unwrap();
    assert!(hex::decode(serialized).is_ok());

    let broadcast = ok(
        &mgr,
        &format!(r#"{{"command":"broadcast_contract","args":{{"contractId":"{id}"}}}}"#),
    )
    .await;
    assert_eq!(broadcast["transaction"]["status"], "broadcast");

    wait_for_confirmation(&mgr, &id).await;

    let executed = ok(
        &mgr,
        &format!(r#"{{"command":"execute_contract","args":{{"contractId":"{id}"}}}}"#),
    )
    .await;
    assert_eq!(executed["status"], "executed");
    assert_eq!(executed["winner"], "1");
    assert_eq!(executed["finalPayout"]["participant1Sats"], 20_000_000);
    assert_eq!(executed["finalPayout"]["participant2Sats"], 0);

    let listed = ok(&mgr, r#"{"command":"list_contracts"}"#).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    mgr.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn app_state_reports_price_and_revision() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = open_manager(dir.path()).await;

    let price = ok(&mgr, r#"{"command":"get_oracle_price"}"#).await;
    assert!(price["cents"].as_u64().unwrap() > 0);
    assert!(price["display"].as_str().unwrap().starts_with('$'));

    let before = ok(&mgr, r#"{"command":"get_app_state"}"#).await;
    ok(
        &mgr,
        r#"{"command":"create_contract","args":{"targetPriceCents":3000000,"collateralSats":1000,"durationHours":1}}"#,
    )
    .await;
    let after = ok(&mgr, r#"{"command":"get_app_state"}"#).await;
    assert!(after["revision"].as_u64().unwrap() > before["revision"].as_u64().unwrap());
    assert_eq!(after["contracts"].as_array().unwrap().len(), 1);
    assert!(after["oraclePrice"]["cents"].is_u64());

    mgr.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn each_command_bumps_revision_once() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = open_manager(dir.path()).await;
    // Let the poller's first tick land.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let before = mgr.revision();
    let created = ok(
        &mgr,
        r#"{"command":"create_contract","args":{"targetPriceCents":3000000,"collateralSats":1000,"durationHours":1}}"#,
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();
    ok(
        &mgr,
        &format!(r#"{{"command":"sign_contract","args":{{"contractId":"{id}","participantId":"1"}}}}"#),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mgr.revision(), before + 2);

    // Reads leave it alone.
    ok(&mgr, r#"{"command":"list_contracts"}"#).await;
    assert_eq!(mgr.revision(), before + 2);
    mgr.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_contract_confirms_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("dlc_config.json"),
        r#"{ "confirmationDelaySecs": 3600, "pollIntervalSecs": 3600 }"#,
    )
    .unwrap();
    let id = {
        let mgr = AppStateManager::open(dir.path().to_path_buf()).unwrap();
        mgr.start().unwrap();
        let created = ok(
            &mgr,
            r#"{"command":"create_contract","args":{"targetPriceCents":3000000,"collateralSats":1000,"durationHours":2}}"#,
        )
        .await;
        let id = created["id"].as_str().unwrap().to_string();
        for who in ["1", "2"] {
            ok(
                &mgr,
                &format!(r#"{{"command":"sign_contract","args":{{"contractId":"{id}","participantId":"{who}"}}}}"#),
            )
            .await;
        }
        ok(
            &mgr,
            &format!(r#"{{"command":"broadcast_contract","args":{{"contractId":"{id}"}}}}"#),
        )
        .await;
        mgr.shutdown();
        id
    };

    let mgr = open_manager(dir.path()).await;
    assert_eq!(mgr.node().pending_confirmations(), 1);
    wait_for_confirmation(&mgr, &id).await;
    mgr.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_requests_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = open_manager(dir.path()).await;

    let response = call(
        &mgr,
        r#"{"id":7,"command":"create_contract","args":{"targetPriceCents":3000000,"collateralSats":1000,"durationHours":200}}"#,
    )
    .await;
    assert_eq!(response["ok"], false);
    assert_eq!(response["id"], 7);
    assert!(response["error"].as_str().unwrap().contains("1-168"));

    let unknown = "ab".repeat(32);
    let response = call(
        &mgr,
        &format!(r#"{{"id":"x","command":"get_contract","args":{{"contractId":"{unknown}"}}}}"#),
    )
    .await;
    assert_eq!(response["ok"], false);
    assert_eq!(response["id"], "x");

    let response = call(&mgr, "not json").await;
    assert_eq!(response["ok"], false);
    assert!(response.get("id").is_none());

    let response = call(&mgr, r#"{"command":"launch_rocket"}"#).await;
    assert_eq!(response["ok"], false);

    mgr.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn contracts_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let mgr = open_manager(dir.path()).await;
        let created = ok(
            &mgr,
            r#"{"command":"create_contract","args":{"targetPriceCents":3000000,"collateralSats":1000,"durationHours":2}}"#,
        )
        .await;
        ok(
            &mgr,
            &format!(
                r#"{{"command":"cancel_contract","args":{{"contractId":"{}"}}}}"#,
                created["id"].as_str().unwrap()
            ),
        )
        .await;
        mgr.shutdown();
        created["id"].as_str().unwrap().to_string()
    };

    let mgr = open_manager(dir.path()).await;
    let contract = ok(
        &mgr,
        &format!(r#"{{"command":"get_contract","args":{{"contractId":"{id}"}}}}"#),
    )
    .await;
    assert_eq!(contract["status"], "cancelled");
    mgr.shutdown();
}
