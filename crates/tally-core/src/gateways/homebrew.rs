use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use serde::Deserialize;

use crate::execution::{CommandSpec, ProcessExecutor, ProcessSpawnRequest};
use crate::gateways::process_utils::{run_and_collect_stdout, run_mutation};
use crate::gateways::{ExecutedCommand, GatewayAction, GatewayResult, PackageGateway};
use crate::models::{InstallReason, LedgerError, LedgerErrorKind, PackageRecord, RecordField};

pub const HOMEBREW_IDENTIFIER: &str = "homebrew";

const HOMEBREW_CAPABILITIES: &[RecordField] = &[
    RecordField::Origin,
    RecordField::Reason,
    RecordField::InstalledAt,
    RecordField::License,
];

const EXTRA_PATH: &str = "/opt/homebrew/bin:/usr/local/bin";

/// Homebrew formulae, driven through the `brew` executable.
pub struct HomebrewGateway {
    executor: Arc<dyn ProcessExecutor>,
    program: PathBuf,
    query_timeout: Option<Duration>,
}

impl HomebrewGateway {
    pub fn new(executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            executor,
            program: PathBuf::from("brew"),
            query_timeout: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    fn command(&self) -> CommandSpec {
        let path = std::env::var("PATH").unwrap_or_default();
        CommandSpec::new(&self.program)
            .env("PATH", format!("{EXTRA_PATH}:{path}"))
            .env("HOMEBREW_NO_AUTO_UPDATE", "1")
            .env("HOMEBREW_NO_ENV_HINTS", "1")
    }

    fn query_request(&self, action: GatewayAction, command: CommandSpec) -> ProcessSpawnRequest {
        let request = ProcessSpawnRequest::new(HOMEBREW_IDENTIFIER, action, command);
        match self.query_timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }
}

impl PackageGateway for HomebrewGateway {
    fn identifier(&self) -> &str {
        HOMEBREW_IDENTIFIER
    }

    fn declared_capabilities(&self) -> &[RecordField] {
        HOMEBREW_CAPABILITIES
    }

    fn is_available(&self) -> GatewayResult<()> {
        let request = self.query_request(
            GatewayAction::Availability,
            self.command().arg("--version"),
        );
        let output = run_and_collect_stdout(self.executor.as_ref(), request).map_err(|error| {
            LedgerError::new(
                LedgerErrorKind::GatewayUnavailable,
                format!("brew is not usable: {}", error.message),
            )
            .with_manager(HOMEBREW_IDENTIFIER)
        })?;
        if output.trim_start().starts_with("Homebrew") {
            Ok(())
        } else {
            Err(LedgerError::new(
                LedgerErrorKind::GatewayUnavailable,
                "brew --version did not identify Homebrew",
            )
            .with_manager(HOMEBREW_IDENTIFIER))
        }
    }

    fn install(&self, names: &[String], options: &[String]) -> ExecutedCommand {
        let command = self
            .command()
            .arg("install")
            .args(options.iter().cloned())
            .args(names.iter().cloned());
        let request = ProcessSpawnRequest::new(HOMEBREW_IDENTIFIER, GatewayAction::Install, command);
        run_mutation(self.executor.as_ref(), request)
    }

    fn remove(&self, names: &[String], options: &[String]) -> ExecutedCommand {
        let command = self
            .command()
            .arg("uninstall")
            .args(options.iter().cloned())
            .args(names.iter().cloned());
        let request = ProcessSpawnRequest::new(HOMEBREW_IDENTIFIER, GatewayAction::Remove, command);
        run_mutation(self.executor.as_ref(), request)
    }

    fn query_all(&self) -> GatewayResult<Vec<PackageRecord>> {
        let request = self.query_request(
            GatewayAction::QueryAll,
            self.command()
                .args(["info", "--json=v2", "--installed", "--formula"]),
        );
        let raw = run_and_collect_stdout(self.executor.as_ref(), request)?;
        parse_info_json(&raw)
    }

    fn query_by_name(&self, names: &[String]) -> GatewayResult<Vec<PackageRecord>> {
        let wanted = names.iter().map(String::as_str).collect::<BTreeSet<_>>();
        Ok(self
            .query_all()?
            .into_iter()
            .filter(|record| wanted.contains(record.name.as_str()))
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct BrewInfo {
    #[serde(default)]
    formulae: Vec<BrewFormula>,
}

#[derive(Debug, Deserialize)]
struct BrewFormula {
    name: String,
    tap: Option<String>,
    license: Option<String>,
    #[serde(default)]
    installed: Vec<BrewInstalled>,
}

#[derive(Debug, Deserialize)]
struct BrewInstalled {
    version: String,
    time: Option<i64>,
    #[serde(default)]
    installed_as_dependency: bool,
    #[serde(default)]
    installed_on_request: bool,
}

fn parse_info_json(raw: &str) -> GatewayResult<Vec<PackageRecord>> {
    let info: BrewInfo = serde_json::from_str(raw).map_err(|error| {
        LedgerError::new(
            LedgerErrorKind::ParseFailure,
            format!("unable to parse `brew info --json=v2` output: {error}"),
        )
        .with_manager(HOMEBREW_IDENTIFIER)
    })?;

    let mut records = info
        .formulae
        .into_iter()
        .filter_map(|formula| {
            // Several kegs may be installed side by side; the last one is linked.
            let active = formula.installed.last()?;
            Some(PackageRecord {
                name: formula.name.clone(),
                version: Some(active.version.clone()),
                origin: formula.tap.clone(),
                reason: Some(if active.installed_on_request || !active.installed_as_dependency {
                    InstallReason::User
                } else {
                    InstallReason::Dependency
                }),
                installed_at: active
                    .time
                    .and_then(|seconds| u64::try_from(seconds).ok())
                    .map(|seconds| UNIX_EPOCH + Duration::from_secs(seconds)),
                checksum: None,
                signature: None,
                license: formula.license.clone(),
                size_bytes: None,
            })
        })
        .collect::<Vec<_>>();
    records.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO_FIXTURE: &str = r#"{
      "formulae": [
        {
          "name": "wget",
          "tap": "homebrew/core",
          "license": "GPL-3.0-or-later",
          "installed": [
            {"version": "1.21.4", "time": 1700000000, "installed_as_dependency": false, "installed_on_request": true}
          ]
        },
        {
          "name": "openssl@3",
          "tap": "homebrew/core",
          "license": "Apache-2.0",
          "installed": [
            {"version": "3.1.0", "time": 1690000000, "installed_as_dependency": true, "installed_on_request": false},
            {"version": "3.2.1", "time": 1710000000, "installed_as_dependency": true, "installed_on_request": false}
          ]
        },
        {"name": "not-installed", "tap": "homebrew/core", "installed": []}
      ],
      "casks": []
    }"#;

    #[test]
    fn parses_installed_formulae_with_best_effort_metadata() {
        let records = parse_info_json(INFO_FIXTURE).unwrap();
        assert_eq!(records.len(), 2);

        let openssl = &records[0];
        assert_eq!(openssl.name, "openssl@3");
        assert_eq!(openssl.version.as_deref(), Some("3.2.1"));
        assert_eq!(openssl.reason, Some(InstallReason::Dependency));
        assert_eq!(
            openssl.installed_at,
            Some(UNIX_EPOCH + Duration::from_secs(1_710_000_000))
        );

        let wget = &records[1];
        assert_eq!(wget.origin.as_deref(), Some("homebrew/core"));
        assert_eq!(wget.reason, Some(InstallReason::User));
        assert_eq!(wget.license.as_deref(), Some("GPL-3.0-or-later"));
        assert!(wget.checksum.is_none());
    }

    #[test]
    fn malformed_json_is_a_parse_failure() {
        let error = parse_info_json("Error: no such keg").unwrap_err();
        assert_eq!(error.kind, LedgerErrorKind::ParseFailure);
        assert_eq!(error.manager.as_deref(), Some(HOMEBREW_IDENTIFIER));
    }
}
