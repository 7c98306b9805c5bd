pub mod classify;
pub mod fanout;

pub use classify::{
    AddedPackage, Classification, ComparedField, UpdatedPackage, classify, merge_update,
};
pub use fanout::LiveState;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::clock::Clock;
use crate::gateways::GatewayRegistry;
use crate::models::{
    CommandId, CurrentPackage, InstallReason, LedgerError, LedgerResult, LogAction,
    NewLogEntry, OperationKind, PackageRef,
};
use crate::orchestration::{
    AuditRecorder, OperationContext, OperationTimeouts, Orchestrator, blocking,
};
use crate::settings::LedgerSettings;
use crate::sqlite::{LedgerStore, log, packages};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DiscoverOptions {
    /// Managers to discover; empty means every configured gateway.
    pub managers: Vec<String>,
    /// Drop existing rows of the answering managers before recording.
    pub clear_existing: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiscoverReport {
    pub command_id: CommandId,
    pub recorded: Vec<PackageRef>,
    pub cleared: usize,
    pub degraded: BTreeMap<String, LedgerError>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncOptions {
    /// Managers to sync; empty means every configured gateway.
    pub managers: Vec<String>,
    /// Apply the classification; otherwise only report it.
    pub apply: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncReport {
    pub command_id: CommandId,
    pub applied: bool,
    pub classification: Classification,
    pub degraded: BTreeMap<String, LedgerError>,
}

/// Compact form of a report, stored as JSON in `command_history.details`.
#[derive(Debug, Serialize)]
struct ReconcileSummary<'a> {
    operation: &'static str,
    applied: bool,
    added: Vec<String>,
    removed: Vec<String>,
    updated: Vec<String>,
    unchanged: usize,
    degraded: BTreeMap<&'a str, &'a str>,
}

impl ReconcileSummary<'_> {
    fn to_json(&self) -> LedgerResult<String> {
        serde_json::to_string(self).map_err(|error| {
            LedgerError::internal(format!("unable to serialise reconcile summary: {error}"))
        })
    }
}

fn degraded_messages(degraded: &BTreeMap<String, LedgerError>) -> BTreeMap<&str, &str> {
    degraded
        .iter()
        .map(|(manager, error)| (manager.as_str(), error.message.as_str()))
        .collect()
}

/// Discovery and sync against every configured gateway.
#[derive(Clone)]
pub struct ReconciliationEngine {
    orchestrator: Orchestrator,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<LedgerStore>, gateways: GatewayRegistry) -> Self {
        Self {
            orchestrator: Orchestrator::new(store, gateways),
        }
    }

    pub fn from_settings(settings: &LedgerSettings, gateways: GatewayRegistry) -> LedgerResult<Self> {
        Orchestrator::from_settings(settings, gateways).map(Self::from_orchestrator)
    }

    /// Shares the orchestrator's store, gateways, clock and audit settings.
    pub fn from_orchestrator(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.orchestrator = self.orchestrator.with_clock(clock);
        self
    }

    pub fn with_timeouts(mut self, timeouts: OperationTimeouts) -> Self {
        self.orchestrator = self.orchestrator.with_timeouts(timeouts);
        self
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        self.orchestrator.store()
    }

    pub fn audit(&self) -> &AuditRecorder {
        self.orchestrator.audit()
    }

    /// Records the live state of every answering gateway as a wholesale
    /// snapshot, optionally after dropping those managers' existing rows.
    /// Comments and locations of packages seen again are carried forward.
    pub async fn discover(
        &self,
        ctx: &OperationContext,
        options: DiscoverOptions,
    ) -> LedgerResult<DiscoverReport> {
        let orchestrator = &self.orchestrator;
        orchestrator
            .audited(ctx, OperationKind::Discover, |command_id| async move {
                ctx.ensure_not_cancelled(OperationKind::Discover)?;
                let live = self.live_state(&options.managers, OperationKind::Discover).await?;
                ctx.ensure_not_cancelled(OperationKind::Discover)?;

                let store = orchestrator.store.clone();
                let now = orchestrator.clock.now();
                let clear_existing = options.clear_existing;
                let healthy = live.healthy.clone();
                let snapshot = live.packages.clone();
                let (recorded, cleared) = blocking("discover", move || {
                    store.write("discover", |transaction| {
                        let previous = packages::snapshot_for_managers(transaction, &healthy)?;
                        let cleared = if clear_existing {
                            packages::clear_managers(transaction, &healthy)?
                        } else {
                            0
                        };

                        let mut recorded = Vec::with_capacity(snapshot.len());
                        for (key, record) in &snapshot {
                            let mut package = CurrentPackage::from_record(
                                &key.manager,
                                record,
                                InstallReason::Discovered,
                                now,
                            );
                            if let Some(existing) = previous.get(key) {
                                package.comment = existing.comment.clone();
                                package.location = existing.location.clone();
                            }
                            packages::upsert(transaction, &package)?;
                            log::insert(
                                transaction,
                                &NewLogEntry::for_package(
                                    command_id,
                                    now,
                                    LogAction::Init,
                                    &package,
                                ),
                            )?;
                            recorded.push(key.clone());
                        }
                        Ok((recorded, cleared))
                    })
                })
                .await?;

                tracing::info!(
                    command_id = command_id.0,
                    recorded = recorded.len(),
                    cleared,
                    degraded = live.degraded.len(),
                    "discovery recorded"
                );

                let details = ReconcileSummary {
                    operation: OperationKind::Discover.as_str(),
                    applied: true,
                    added: recorded.iter().map(ToString::to_string).collect(),
                    removed: Vec::new(),
                    updated: Vec::new(),
                    unchanged: 0,
                    degraded: degraded_messages(&live.degraded),
                }
                .to_json()?;

                Ok((
                    DiscoverReport {
                        command_id,
                        recorded,
                        cleared,
                        degraded: live.degraded,
                    },
                    Some(details),
                ))
            })
            .await
    }

    /// Classifies live state against the ledger for the answering managers.
    /// With `apply` the three change buckets are written in one transaction;
    /// otherwise nothing but the command history row is written.
    pub async fn sync(
        &self,
        ctx: &OperationContext,
        options: SyncOptions,
    ) -> LedgerResult<SyncReport> {
        let orchestrator = &self.orchestrator;
        orchestrator
            .audited(ctx, OperationKind::Sync, |command_id| async move {
                ctx.ensure_not_cancelled(OperationKind::Sync)?;
                let live = self.live_state(&options.managers, OperationKind::Sync).await?;

                let store = orchestrator.store.clone();
                let healthy = live.healthy.clone();
                let snapshot = live.packages.clone();
                let capabilities = live.capabilities.clone();

                let classification = if options.apply {
                    ctx.ensure_not_cancelled(OperationKind::Sync)?;
                    let now = orchestrator.clock.now();
                    blocking("sync", move || {
                        store.write("sync", |transaction| {
                            let ledger = packages::snapshot_for_managers(transaction, &healthy)?;
                            let classification = classify(&snapshot, &ledger, &capabilities);
                            apply_classification(transaction, command_id, &classification, now)?;
                            Ok(classification)
                        })
                    })
                    .await?
                } else {
                    blocking("sync", move || {
                        store.read("sync", |connection| {
                            let ledger = packages::snapshot_for_managers(connection, &healthy)?;
                            Ok(classify(&snapshot, &ledger, &capabilities))
                        })
                    })
                    .await?
                };

                tracing::info!(
                    command_id = command_id.0,
                    applied = options.apply,
                    added = classification.added.len(),
                    removed = classification.removed.len(),
                    updated = classification.updated.len(),
                    unchanged = classification.unchanged.len(),
                    degraded = live.degraded.len(),
                    "sync classified"
                );

                let details = ReconcileSummary {
                    operation: OperationKind::Sync.as_str(),
                    applied: options.apply,
                    added: classification
                        .added
                        .iter()
                        .map(|added| added.package.to_string())
                        .collect(),
                    removed: classification
                        .removed
                        .iter()
                        .map(|removed| removed.package.to_string())
                        .collect(),
                    updated: classification
                        .updated
                        .iter()
                        .map(|updated| updated.previous.package.to_string())
                        .collect(),
                    unchanged: classification.unchanged.len(),
                    degraded: degraded_messages(&live.degraded),
                }
                .to_json()?;

                Ok((
                    SyncReport {
                        command_id,
                        applied: options.apply,
                        classification,
                        degraded: live.degraded,
                    },
                    Some(details),
                ))
            })
            .await
    }

    async fn live_state(
        &self,
        managers: &[String],
        operation: OperationKind,
    ) -> LedgerResult<LiveState> {
        let gateways = self.orchestrator.gateways.scope(managers)?;
        fanout::query_all_gateways(
            gateways,
            self.orchestrator.timeouts.gateway_query,
            operation,
        )
        .await
    }
}

fn apply_classification(
    connection: &rusqlite::Connection,
    command_id: CommandId,
    classification: &Classification,
    now: std::time::SystemTime,
) -> LedgerResult<()> {
    for added in &classification.added {
        let package = CurrentPackage::from_record(
            &added.package.manager,
            &added.live,
            InstallReason::Discovered,
            now,
        );
        packages::upsert(connection, &package)?;
        log::insert(
            connection,
            &NewLogEntry::for_package(command_id, now, LogAction::SyncAdd, &package),
        )?;
    }

    for removed in &classification.removed {
        packages::delete(connection, &removed.package)?;
        log::insert(
            connection,
            &NewLogEntry::for_package(command_id, now, LogAction::SyncRemove, removed),
        )?;
    }

    for updated in &classification.updated {
        let merged = merge_update(updated, now);
        packages::upsert(connection, &merged)?;
        log::insert(
            connection,
            &NewLogEntry::for_package(command_id, now, LogAction::SyncUpdate, &merged),
        )?;
    }

    Ok(())
}
