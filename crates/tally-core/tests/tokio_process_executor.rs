#![cfg(unix)]

use std::time::{Duration, Instant};

use tally_core::execution::{
    CommandSpec, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest, TokioProcessExecutor,
    spawn_validated,
};
use tally_core::gateways::GatewayAction;
use tally_core::models::{LedgerError, LedgerErrorKind};

fn shell(action: GatewayAction, script: &str) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new("brew", action, CommandSpec::new("/bin/sh").arg("-c").arg(script))
}

async fn run(request: ProcessSpawnRequest) -> Result<ProcessOutput, LedgerError> {
    match spawn_validated(&TokioProcessExecutor, request) {
        Ok(process) => process.wait().await,
        Err(error) => Err(error),
    }
}

#[tokio::test]
async fn collects_both_streams_and_the_exit_code() {
    let output = run(shell(
        GatewayAction::Install,
        "echo '==> Pouring jq'; echo 'Warning: jq is keg-only' >&2; exit 3",
    ))
    .await
    .unwrap();

    assert_eq!(output.status, ProcessExitStatus::ExitCode(3));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "==> Pouring jq");
    assert_eq!(
        String::from_utf8_lossy(&output.stderr).trim(),
        "Warning: jq is keg-only"
    );
    assert!(output.started_at <= output.finished_at);
}

#[tokio::test]
async fn a_signalled_child_reports_terminated() {
    let output = run(shell(GatewayAction::Remove, "kill -9 $$")).await.unwrap();
    assert_eq!(output.status, ProcessExitStatus::Terminated);
}

#[tokio::test]
async fn the_child_sees_the_requested_environment() {
    let request = ProcessSpawnRequest::new(
        "brew",
        GatewayAction::QueryAll,
        CommandSpec::new("/bin/sh")
            .arg("-c")
            .arg("printf %s \"$HOMEBREW_NO_AUTO_UPDATE\"")
            .env("HOMEBREW_NO_AUTO_UPDATE", "1"),
    );

    let output = run(request).await.unwrap();
    assert_eq!(output.stdout, b"1");
}

#[tokio::test]
async fn timeout_kills_the_whole_group_and_names_the_command() {
    // The background sleep keeps stdout open; only a group kill ends it.
    let request = shell(GatewayAction::Install, "sleep 30 & sleep 30")
        .timeout(Duration::from_millis(100));

    let started = Instant::now();
    let error = run(request).await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(error.kind, LedgerErrorKind::Timeout);
    assert_eq!(error.manager.as_deref(), Some("brew"));
    assert!(
        error.message.contains("`/bin/sh -c 'sleep 30 & sleep 30'`"),
        "unexpected message: {}",
        error.message
    );
}

#[tokio::test]
async fn a_missing_program_fails_with_the_rendered_command() {
    let request = ProcessSpawnRequest::new(
        "brew",
        GatewayAction::Availability,
        CommandSpec::new("/nonexistent/bin/brew").arg("--version"),
    );

    let error = run(request).await.unwrap_err();
    assert_eq!(error.kind, LedgerErrorKind::GatewayExecutionFailed);
    assert_eq!(error.manager.as_deref(), Some("brew"));
    assert!(error.message.starts_with("availability: could not start"));
    assert!(error.message.contains("/nonexistent/bin/brew --version"));
}
