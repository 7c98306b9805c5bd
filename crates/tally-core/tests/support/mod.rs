#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tally_core::clock::FixedClock;
use tally_core::gateways::{ExecutedCommand, GatewayRegistry, GatewayResult, PackageGateway};
use tally_core::models::{LedgerError, LedgerErrorKind, PackageRecord, RecordField};
use tally_core::sqlite::LedgerStore;

pub fn test_db_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("tally-{test_name}-{nanos}.sqlite3"))
}

pub fn migrated_store(test_name: &str) -> Arc<LedgerStore> {
    let store = LedgerStore::new(test_db_path(test_name));
    store.migrate_to_latest().expect("migrations should apply");
    Arc::new(store)
}

pub fn at(seconds: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(seconds)
}

pub fn fixed_clock(seconds: u64) -> Arc<FixedClock> {
    Arc::new(FixedClock::new(at(seconds)))
}

pub fn registry(gateways: Vec<Arc<FakeGateway>>) -> GatewayRegistry {
    GatewayRegistry::new(
        gateways
            .into_iter()
            .map(|gateway| gateway as Arc<dyn PackageGateway>),
    )
    .expect("registry creation should succeed")
}

pub fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[derive(Default)]
struct FakeState {
    installed: BTreeMap<String, PackageRecord>,
    catalog: BTreeMap<String, PackageRecord>,
    /// Names the manager silently skips on install or remove.
    ignored: BTreeSet<String>,
    mutation_failure: Option<i32>,
    query_failure: bool,
    unavailable: bool,
    query_delay: Option<Duration>,
    mutations: Vec<String>,
}

/// In-memory package manager. Installs pull records from the catalog (or
/// invent version 1.0) and skip names already installed unless the catalog
/// offers a different version; removals drop them.
pub struct FakeGateway {
    identifier: String,
    capabilities: Vec<RecordField>,
    state: Mutex<FakeState>,
}

impl FakeGateway {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            capabilities: Vec::new(),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: &[RecordField]) -> Self {
        self.capabilities = capabilities.to_vec();
        self
    }

    pub fn with_installed(self, records: Vec<PackageRecord>) -> Self {
        for record in records {
            self.set_installed(record);
        }
        self
    }

    pub fn with_catalog(self, records: Vec<PackageRecord>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for record in records {
                state.catalog.insert(record.name.clone(), record);
            }
        }
        self
    }

    pub fn ignoring(self, name: &str) -> Self {
        self.state.lock().unwrap().ignored.insert(name.to_string());
        self
    }

    pub fn fail_mutations_with(&self, exit_code: i32) {
        self.state.lock().unwrap().mutation_failure = Some(exit_code);
    }

    pub fn fail_queries(&self) {
        self.state.lock().unwrap().query_failure = true;
    }

    pub fn make_unavailable(&self) {
        self.state.lock().unwrap().unavailable = true;
    }

    pub fn delay_queries(&self, delay: Duration) {
        self.state.lock().unwrap().query_delay = Some(delay);
    }

    /// Simulates a change made outside the tool.
    pub fn set_installed(&self, record: PackageRecord) {
        self.state
            .lock()
            .unwrap()
            .installed
            .insert(record.name.clone(), record);
    }

    /// Simulates a removal made outside the tool.
    pub fn remove_installed(&self, name: &str) {
        self.state.lock().unwrap().installed.remove(name);
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.state.lock().unwrap().installed.contains_key(name)
    }

    pub fn mutations(&self) -> Vec<String> {
        self.state.lock().unwrap().mutations.clone()
    }

    fn mutate(&self, verb: &str, names: &[String], options: &[String]) -> ExecutedCommand {
        let command_line = std::iter::once(format!("fake-{}", self.identifier))
            .chain(std::iter::once(verb.to_string()))
            .chain(options.iter().cloned())
            .chain(names.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");

        let mut state = self.state.lock().unwrap();
        state.mutations.push(command_line.clone());

        if let Some(code) = state.mutation_failure {
            let error = LedgerError::new(
                LedgerErrorKind::GatewayExecutionFailed,
                format!("{verb} exited with code {code}: simulated failure"),
            )
            .with_manager(self.identifier.clone())
            .with_exit_code(code);
            return ExecutedCommand::failed(command_line, Some(code), error);
        }

        for name in names {
            if state.ignored.contains(name) {
                continue;
            }
            if verb == "install" {
                let upgrade = state.catalog.get(name).filter(|candidate| {
                    state
                        .installed
                        .get(name)
                        .is_none_or(|current| current.version != candidate.version)
                });
                let record = match (upgrade, state.installed.contains_key(name)) {
                    (Some(candidate), _) => candidate.clone(),
                    // Already installed and nothing newer: a real manager skips it.
                    (None, true) => continue,
                    (None, false) => PackageRecord::new(name.clone(), Some("1.0")),
                };
                state.installed.insert(name.clone(), record);
            } else {
                state.installed.remove(name);
            }
        }
        ExecutedCommand::succeeded(command_line)
    }

    fn check_queries(&self) -> GatewayResult<()> {
        let delay = self.state.lock().unwrap().query_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.state.lock().unwrap().query_failure {
            return Err(LedgerError::new(
                LedgerErrorKind::GatewayExecutionFailed,
                "simulated query failure",
            )
            .with_manager(self.identifier.clone()));
        }
        Ok(())
    }
}

impl PackageGateway for FakeGateway {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn declared_capabilities(&self) -> &[RecordField] {
        &self.capabilities
    }

    fn is_available(&self) -> GatewayResult<()> {
        if self.state.lock().unwrap().unavailable {
            return Err(LedgerError::new(
                LedgerErrorKind::GatewayUnavailable,
                "simulated missing executable",
            )
            .with_manager(self.identifier.clone()));
        }
        Ok(())
    }

    fn install(&self, names: &[String], options: &[String]) -> ExecutedCommand {
        self.mutate("install", names, options)
    }

    fn remove(&self, names: &[String], options: &[String]) -> ExecutedCommand {
        self.mutate("remove", names, options)
    }

    fn query_all(&self) -> GatewayResult<Vec<PackageRecord>> {
        self.check_queries()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .installed
            .values()
            .cloned()
            .collect())
    }

    fn query_by_name(&self, names: &[String]) -> GatewayResult<Vec<PackageRecord>> {
        self.check_queries()?;
        let state = self.state.lock().unwrap();
        Ok(names
            .iter()
            .filter_map(|name| state.installed.get(name).cloned())
            .collect())
    }
}
