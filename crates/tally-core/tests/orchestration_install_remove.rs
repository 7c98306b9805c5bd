mod support;

use std::sync::Arc;
use std::time::Duration;

use tally_core::models::{
    InstallReason, LedgerErrorKind, LogAction, LogQuery, PackageFilter, PackageRecord,
    PackageRef,
};
use tally_core::orchestration::{
    CancellationToken, ManualEntry, OperationContext, OperationTimeouts, Orchestrator,
};

use support::{FakeGateway, at, fixed_clock, migrated_store, names, registry};

fn orchestrator(test_name: &str, gateway: Arc<FakeGateway>) -> Orchestrator {
    Orchestrator::new(migrated_store(test_name), registry(vec![gateway]))
        .with_clock(fixed_clock(1_000))
        .with_tool_version("0.3.0-test")
}

fn log_for(orchestrator: &Orchestrator, query: LogQuery) -> Vec<tally_core::models::LogEntry> {
    orchestrator.store().list_log(&query).unwrap()
}

#[tokio::test]
async fn successful_install_records_package_log_and_history() {
    let gateway = Arc::new(FakeGateway::new("brew"));
    let orchestrator = orchestrator("install-ok", gateway.clone());
    let ctx = OperationContext::new("tally install vim");

    let report = orchestrator
        .install(&ctx, "brew", &names(&["vim"]), &[])
        .await
        .unwrap();

    assert_eq!(report.changed, vec![PackageRef::new("brew", "vim")]);
    assert!(report.skipped.is_empty());

    let vim = orchestrator.store().package("vim", Some("brew")).unwrap();
    assert_eq!(vim.reason, Some(InstallReason::User));
    assert_eq!(vim.version.as_deref(), Some("1.0"));
    assert_eq!(vim.last_updated, at(1_000));
    assert_eq!(vim.installed_at, Some(at(1_000)));

    let entries = log_for(&orchestrator, LogQuery::default());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, LogAction::Installed);
    assert_eq!(entries[0].command_id, Some(report.command_id));

    let history = orchestrator.store().command(report.command_id).unwrap();
    assert_eq!(history.exit_code, Some(0));
    assert_eq!(history.invocation, "tally install vim");
    assert_eq!(history.pm_command.as_deref(), Some("fake-brew install vim"));
    assert_eq!(history.tool_version, "0.3.0-test");
}

#[tokio::test]
async fn failed_install_mutates_nothing_and_records_the_failure() {
    let gateway = Arc::new(FakeGateway::new("brew"));
    gateway.fail_mutations_with(2);
    let orchestrator = orchestrator("install-fail", gateway.clone());
    let ctx = OperationContext::new("tally install vim");

    let error = orchestrator
        .install(&ctx, "brew", &names(&["vim"]), &[])
        .await
        .unwrap_err();
    assert_eq!(error.kind, LedgerErrorKind::GatewayExecutionFailed);
    assert_eq!(error.exit_code(), 2);

    assert!(
        orchestrator
            .store()
            .list_packages(&PackageFilter::default())
            .unwrap()
            .is_empty()
    );
    assert!(log_for(&orchestrator, LogQuery::default()).is_empty());

    let history = orchestrator.store().recent_commands(1).unwrap();
    assert_eq!(history[0].exit_code, Some(2));
    assert!(history[0].error_message.is_some());
    assert_eq!(history[0].pm_command.as_deref(), Some("fake-brew install vim"));
    assert!(!history[0].is_interrupted());
}

#[tokio::test]
async fn only_packages_confirmed_by_the_post_check_are_recorded() {
    let gateway = Arc::new(
        FakeGateway::new("brew")
            .with_installed(vec![PackageRecord::new("git", Some("2.44"))])
            .ignoring("ghost"),
    );
    let orchestrator = orchestrator("install-subset", gateway.clone());
    let ctx = OperationContext::new("tally install vim git ghost");

    let report = orchestrator
        .install(&ctx, "brew", &names(&["vim", "git", "ghost"]), &[])
        .await
        .unwrap();

    assert_eq!(report.changed, vec![PackageRef::new("brew", "vim")]);
    assert_eq!(
        report.skipped,
        vec![PackageRef::new("brew", "git"), PackageRef::new("brew", "ghost")]
    );

    let rows = orchestrator
        .store()
        .list_packages(&PackageFilter::default())
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(log_for(&orchestrator, LogQuery::default()).len(), 1);
}

#[tokio::test]
async fn reinstall_with_a_new_version_counts_as_a_change_and_keeps_annotations() {
    let mut upgraded = PackageRecord::new("vim", Some("9.1"));
    upgraded.installed_at = Some(at(900));
    let gateway = Arc::new(
        FakeGateway::new("brew")
            .with_installed(vec![PackageRecord::new("vim", Some("9.0"))])
            .with_catalog(vec![upgraded]),
    );
    let orchestrator = orchestrator("install-upgrade", gateway.clone());

    orchestrator
        .manual_add(
            &OperationContext::new("tally manual-add"),
            ManualEntry::new("brew", "vim")
                .with_version("9.0")
                .with_location("/opt/homebrew/bin/vim")
                .with_comment("daily driver"),
        )
        .await
        .unwrap();

    let report = orchestrator
        .install(
            &OperationContext::new("tally install vim"),
            "brew",
            &names(&["vim"]),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(report.changed.len(), 1);

    let vim = orchestrator.store().package("vim", None).unwrap();
    assert_eq!(vim.version.as_deref(), Some("9.1"));
    assert_eq!(vim.comment.as_deref(), Some("daily driver"));
    assert_eq!(vim.location.as_deref(), Some("/opt/homebrew/bin/vim"));
    assert_eq!(vim.installed_at, Some(at(900)));
}

#[tokio::test]
async fn remove_deletes_confirmed_packages_and_logs_the_last_state() {
    let gateway = Arc::new(FakeGateway::new("brew"));
    let orchestrator = orchestrator("remove-ok", gateway.clone());
    orchestrator
        .install(
            &OperationContext::new("tally install vim"),
            "brew",
            &names(&["vim"]),
            &[],
        )
        .await
        .unwrap();

    let report = orchestrator
        .remove(
            &OperationContext::new("tally remove vim emacs"),
            "brew",
            &names(&["vim", "emacs"]),
            &names(&["--force"]),
        )
        .await
        .unwrap();

    assert_eq!(report.changed, vec![PackageRef::new("brew", "vim")]);
    assert_eq!(report.skipped, vec![PackageRef::new("brew", "emacs")]);
    assert!(!gateway.is_installed("vim"));
    assert!(orchestrator.store().package("vim", None).is_err());

    let removed = log_for(
        &orchestrator,
        LogQuery {
            actions: vec![LogAction::Removed],
            ..LogQuery::default()
        },
    );
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].command_id, Some(report.command_id));
    assert_eq!(removed[0].snapshot.version.as_deref(), Some("1.0"));

    let history = orchestrator.store().command(report.command_id).unwrap();
    assert_eq!(
        history.pm_command.as_deref(),
        Some("fake-brew remove --force vim emacs")
    );
}

#[tokio::test]
async fn cancellation_before_invocation_aborts_and_finalizes_history() {
    let gateway = Arc::new(FakeGateway::new("brew"));
    let orchestrator = orchestrator("install-cancel", gateway.clone());
    let token = CancellationToken::new();
    token.cancel();
    let ctx = OperationContext::new("tally install vim").with_cancellation(token);

    let error = orchestrator
        .install(&ctx, "brew", &names(&["vim"]), &[])
        .await
        .unwrap_err();

    assert_eq!(error.kind, LedgerErrorKind::Cancelled);
    assert!(gateway.mutations().is_empty());
    let history = orchestrator.store().recent_commands(1).unwrap();
    assert_eq!(history[0].exit_code, Some(130));
    assert!(orchestrator.store().interrupted_commands().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_or_unavailable_managers_fail_before_any_mutation() {
    let gateway = Arc::new(FakeGateway::new("brew"));
    gateway.make_unavailable();
    let orchestrator = orchestrator("install-unavailable", gateway.clone());

    let unknown = orchestrator
        .install(
            &OperationContext::new("tally install --manager apt vim"),
            "apt",
            &names(&["vim"]),
            &[],
        )
        .await
        .unwrap_err();
    assert_eq!(unknown.kind, LedgerErrorKind::GatewayUnavailable);

    let unavailable = orchestrator
        .install(
            &OperationContext::new("tally install vim"),
            "brew",
            &names(&["vim"]),
            &[],
        )
        .await
        .unwrap_err();
    assert_eq!(unavailable.kind, LedgerErrorKind::GatewayUnavailable);
    assert!(gateway.mutations().is_empty());

    let history = orchestrator.store().recent_commands(10).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|row| row.exit_code == Some(1)));
}

#[tokio::test]
async fn slow_gateway_queries_surface_as_timeouts() {
    let gateway = Arc::new(FakeGateway::new("brew"));
    gateway.delay_queries(Duration::from_millis(300));
    let orchestrator = orchestrator("install-timeout", gateway.clone()).with_timeouts(
        OperationTimeouts {
            gateway_query: Some(Duration::from_millis(20)),
            gateway_mutation: None,
        },
    );

    let error = orchestrator
        .install(
            &OperationContext::new("tally install vim"),
            "brew",
            &names(&["vim"]),
            &[],
        )
        .await
        .unwrap_err();

    assert_eq!(error.kind, LedgerErrorKind::Timeout);
    assert_eq!(error.manager.as_deref(), Some("brew"));
    assert!(gateway.mutations().is_empty());
    let history = orchestrator.store().recent_commands(1).unwrap();
    assert_eq!(history[0].exit_code, Some(124));
}

#[tokio::test]
async fn manual_remove_requires_an_unambiguous_target() {
    let gateway = Arc::new(FakeGateway::new("brew"));
    let orchestrator = orchestrator("manual-remove", gateway);
    for manager in ["brew", "manual"] {
        orchestrator
            .manual_add(
                &OperationContext::new("tally manual-add git"),
                ManualEntry::new(manager, "git").with_version("2.44"),
            )
            .await
            .unwrap();
    }

    let ambiguous = orchestrator
        .manual_remove(&OperationContext::new("tally manual-remove git"), "git", None)
        .await
        .unwrap_err();
    assert_eq!(ambiguous.kind, LedgerErrorKind::Ambiguous);

    let missing = orchestrator
        .manual_remove(&OperationContext::new("tally manual-remove hg"), "hg", None)
        .await
        .unwrap_err();
    assert_eq!(missing.kind, LedgerErrorKind::NotFound);

    let report = orchestrator
        .manual_remove(
            &OperationContext::new("tally manual-remove git --manager manual"),
            "git",
            Some("manual"),
        )
        .await
        .unwrap();
    assert_eq!(report.changed, vec![PackageRef::new("manual", "git")]);

    let remaining = orchestrator
        .store()
        .list_packages(&PackageFilter::default())
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].package.manager, "brew");

    let removed = log_for(
        &orchestrator,
        LogQuery {
            actions: vec![LogAction::ManualRemoveLog],
            ..LogQuery::default()
        },
    );
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].snapshot.version.as_deref(), Some("2.44"));
}
