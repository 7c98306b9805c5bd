mod support;

use std::sync::Arc;
use std::time::Duration;

use tally_core::orchestration::{ManualEntry, OperationContext, Orchestrator};
use tally_core::reconcile::ReconciliationEngine;
use tally_core::settings::LedgerSettings;
use tally_core::sqlite::current_schema_version;

use support::{FakeGateway, registry, test_db_path};

fn settings(test_name: &str) -> LedgerSettings {
    LedgerSettings {
        database_path: test_db_path(test_name),
        tool_version: "9.9.9-configured".to_string(),
        store_busy_timeout_ms: 750,
        gateway_query_timeout_ms: Some(2_000),
        gateway_mutation_timeout_ms: None,
        ..LedgerSettings::default()
    }
}

#[tokio::test]
async fn settings_reach_the_store_timeouts_and_history() {
    let settings = settings("settings-orchestrator");
    let orchestrator = Orchestrator::from_settings(
        &settings,
        registry(vec![Arc::new(FakeGateway::new("brew"))]),
    )
    .unwrap();

    let store = orchestrator.store();
    assert_eq!(store.database_path(), settings.database_path.as_path());
    assert_eq!(store.busy_timeout(), Duration::from_millis(750));
    assert_eq!(store.current_version().unwrap(), current_schema_version());
    assert_eq!(orchestrator.timeouts(), settings.timeouts());
    assert_eq!(
        orchestrator.timeouts().gateway_query,
        Some(Duration::from_secs(2))
    );

    let report = orchestrator
        .manual_add(
            &OperationContext::new("tally manual-add mytool"),
            ManualEntry::new("manual", "mytool"),
        )
        .await
        .unwrap();
    assert_eq!(
        store.command(report.command_id).unwrap().tool_version,
        "9.9.9-configured"
    );
}

#[tokio::test]
async fn the_engine_opens_the_same_configured_ledger() {
    let settings = settings("settings-engine");
    let engine =
        ReconciliationEngine::from_settings(&settings, registry(Vec::new())).unwrap();
    assert_eq!(engine.store().database_path(), settings.database_path.as_path());
    assert_eq!(engine.audit().tool_version(), "9.9.9-configured");
}
