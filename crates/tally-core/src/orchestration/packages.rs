use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::gateways::PackageGateway;
use crate::models::{
    CommandId, CurrentPackage, InstallReason, LedgerError, LedgerResult, LogAction,
    NewLogEntry, OperationKind, PackageRecord, PackageRef,
};
use crate::orchestration::{
    OperationContext, OperationReport, Orchestrator, blocking, call_gateway,
};
use crate::sqlite::{log, packages};

/// A package recorded by hand, for software no gateway manages.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ManualEntry {
    pub package: PackageRef,
    pub version: Option<String>,
    pub origin: Option<String>,
    pub reason: Option<InstallReason>,
    pub location: Option<String>,
    pub comment: Option<String>,
}

impl ManualEntry {
    pub fn new(manager: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: PackageRef::new(manager, name),
            version: None,
            origin: None,
            reason: None,
            location: None,
            comment: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

impl Orchestrator {
    /// Installs `names` through the manager's gateway and records the
    /// packages the post-install query confirms as newly installed or changed.
    pub async fn install(
        &self,
        ctx: &OperationContext,
        manager: &str,
        names: &[String],
        options: &[String],
    ) -> LedgerResult<OperationReport> {
        self.audited(ctx, OperationKind::Install, |command_id| async move {
            let report = self
                .run_gateway_mutation(ctx, command_id, OperationKind::Install, manager, names, options)
                .await?;
            Ok((report, None))
        })
        .await
    }

    /// Removes `names` through the manager's gateway and drops the packages
    /// the post-removal query confirms are gone.
    pub async fn remove(
        &self,
        ctx: &OperationContext,
        manager: &str,
        names: &[String],
        options: &[String],
    ) -> LedgerResult<OperationReport> {
        self.audited(ctx, OperationKind::Remove, |command_id| async move {
            let report = self
                .run_gateway_mutation(ctx, command_id, OperationKind::Remove, manager, names, options)
                .await?;
            Ok((report, None))
        })
        .await
    }

    pub async fn manual_add(
        &self,
        ctx: &OperationContext,
        entry: ManualEntry,
    ) -> LedgerResult<OperationReport> {
        self.audited(ctx, OperationKind::ManualAdd, |command_id| async move {
            validate_package_ref(&entry.package)?;
            ctx.ensure_not_cancelled(OperationKind::ManualAdd)?;

            let store = self.store.clone();
            let now = self.clock.now();
            let key = entry.package.clone();
            blocking("manual_add", move || {
                store.write("manual_add", |transaction| {
                    let package = CurrentPackage {
                        origin: entry.origin,
                        version: entry.version,
                        reason: Some(entry.reason.unwrap_or(InstallReason::User)),
                        location: entry.location,
                        comment: entry.comment,
                        installed_at: Some(now),
                        ..CurrentPackage::new(entry.package, now)
                    };
                    packages::upsert(transaction, &package)?;
                    log::insert(
                        transaction,
                        &NewLogEntry::for_package(command_id, now, LogAction::ManualAdd, &package),
                    )?;
                    Ok(())
                })
            })
            .await?;

            tracing::info!(command_id = command_id.0, package = %key, "recorded manual package");
            Ok((
                OperationReport {
                    command_id,
                    changed: vec![key],
                    skipped: Vec::new(),
                },
                None,
            ))
        })
        .await
    }

    /// Drops a package from the ledger without touching the system. Without
    /// a manager the name must be tracked under exactly one manager.
    pub async fn manual_remove(
        &self,
        ctx: &OperationContext,
        name: &str,
        manager: Option<&str>,
    ) -> LedgerResult<OperationReport> {
        self.audited(ctx, OperationKind::ManualRemove, |command_id| async move {
            ctx.ensure_not_cancelled(OperationKind::ManualRemove)?;

            let store = self.store.clone();
            let now = self.clock.now();
            let name = name.to_string();
            let manager = manager.map(str::to_owned);
            let removed = blocking("manual_remove", move || {
                store.write("manual_remove", |transaction| {
                    let existing = packages::find(transaction, &name, manager.as_deref())?;
                    packages::delete(transaction, &existing.package)?;
                    log::insert(
                        transaction,
                        &NewLogEntry::for_package(
                            command_id,
                            now,
                            LogAction::ManualRemoveLog,
                            &existing,
                        ),
                    )?;
                    Ok(existing.package)
                })
            })
            .await?;

            tracing::info!(command_id = command_id.0, package = %removed, "removed package from ledger");
            Ok((
                OperationReport {
                    command_id,
                    changed: vec![removed],
                    skipped: Vec::new(),
                },
                None,
            ))
        })
        .await
    }

    async fn run_gateway_mutation(
        &self,
        ctx: &OperationContext,
        command_id: CommandId,
        operation: OperationKind,
        manager: &str,
        names: &[String],
        options: &[String],
    ) -> LedgerResult<OperationReport> {
        let names = requested_names(names)?;
        let gateway = self.gateways.get(manager)?;

        ctx.ensure_not_cancelled(operation)?;
        call_gateway(
            gateway.clone(),
            self.timeouts.gateway_query,
            operation,
            |gateway| gateway.is_available(),
        )
        .await?;
        let before = self.query_installed(&gateway, &names, operation).await?;

        // Last point at which cancellation is honoured; once the external
        // command starts it runs to completion and its result is recorded.
        ctx.ensure_not_cancelled(operation)?;
        let executed = {
            let names = names.clone();
            let options = options.to_vec();
            call_gateway(
                gateway.clone(),
                self.timeouts.gateway_mutation,
                operation,
                move |gateway| {
                    Ok(match operation {
                        OperationKind::Remove => gateway.remove(&names, &options),
                        _ => gateway.install(&names, &options),
                    })
                },
            )
            .await?
        };

        if !executed.command_line.is_empty() {
            if let Err(error) = self
                .audit
                .attach_external_command(command_id, &executed.command_line)
                .await
            {
                tracing::warn!(
                    command_id = command_id.0,
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to record external command"
                );
            }
        }

        if let Err(error) = executed.result {
            let error = match executed.exit_code {
                Some(code) if error.exit_code.is_none() => error.with_exit_code(code),
                _ => error,
            };
            return Err(error.with_manager(manager));
        }

        let after = self.query_installed(&gateway, &names, operation).await?;

        let mut confirmed = Vec::new();
        let mut skipped = Vec::new();
        for name in &names {
            let key = PackageRef::new(manager, name.clone());
            let changed = match operation {
                OperationKind::Remove => before.contains_key(name) && !after.contains_key(name),
                _ => match after.get(name) {
                    Some(record) => before
                        .get(name)
                        .is_none_or(|previous| previous.version != record.version),
                    None => false,
                },
            };
            if changed {
                let record = match operation {
                    OperationKind::Remove => before.get(name),
                    _ => after.get(name),
                };
                if let Some(record) = record {
                    confirmed.push(record.clone());
                }
            } else {
                skipped.push(key);
            }
        }

        let changed = if confirmed.is_empty() {
            Vec::new()
        } else {
            self.persist_confirmed(command_id, operation, manager, confirmed)
                .await?
        };

        tracing::info!(
            command_id = command_id.0,
            manager,
            operation = operation.as_str(),
            changed = changed.len(),
            skipped = skipped.len(),
            "gateway mutation reconciled"
        );

        Ok(OperationReport {
            command_id,
            changed,
            skipped,
        })
    }

    async fn query_installed(
        &self,
        gateway: &Arc<dyn PackageGateway>,
        names: &[String],
        operation: OperationKind,
    ) -> LedgerResult<BTreeMap<String, PackageRecord>> {
        let names = names.to_vec();
        let records = call_gateway(
            gateway.clone(),
            self.timeouts.gateway_query,
            operation,
            move |gateway| gateway.query_by_name(&names),
        )
        .await?;
        Ok(records
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect())
    }

    async fn persist_confirmed(
        &self,
        command_id: CommandId,
        operation: OperationKind,
        manager: &str,
        confirmed: Vec<PackageRecord>,
    ) -> LedgerResult<Vec<PackageRef>> {
        let store = self.store.clone();
        let now = self.clock.now();
        let manager = manager.to_string();
        blocking(operation.as_str(), move || {
            store.write(operation.as_str(), |transaction| {
                let mut changed = Vec::with_capacity(confirmed.len());
                for record in &confirmed {
                    let key = PackageRef::new(manager.clone(), record.name.clone());
                    let existing = packages::get(transaction, &key)?;

                    if operation == OperationKind::Remove {
                        let snapshot = existing.unwrap_or_else(|| CurrentPackage {
                            reason: record.reason,
                            ..CurrentPackage::from_record(
                                &manager,
                                record,
                                InstallReason::Discovered,
                                now,
                            )
                        });
                        packages::delete(transaction, &key)?;
                        log::insert(
                            transaction,
                            &NewLogEntry::for_package(
                                command_id,
                                now,
                                LogAction::Removed,
                                &snapshot,
                            ),
                        )?;
                    } else {
                        let mut package =
                            CurrentPackage::from_record(&manager, record, InstallReason::User, now);
                        package.reason = Some(InstallReason::User);
                        package.installed_at = package.installed_at.or(Some(now));
                        if let Some(existing) = existing {
                            package.comment = existing.comment;
                            package.location = existing.location;
                        }
                        packages::upsert(transaction, &package)?;
                        log::insert(
                            transaction,
                            &NewLogEntry::for_package(
                                command_id,
                                now,
                                LogAction::Installed,
                                &package,
                            ),
                        )?;
                    }
                    changed.push(key);
                }
                Ok(changed)
            })
        })
        .await
    }
}

/// Trimmed, de-duplicated names in request order.
fn requested_names(names: &[String]) -> LedgerResult<Vec<String>> {
    let mut seen = BTreeSet::new();
    let mut requested = Vec::with_capacity(names.len());
    for name in names {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(LedgerError::invalid_input("package names must not be empty"));
        }
        if seen.insert(trimmed.to_string()) {
            requested.push(trimmed.to_string());
        }
    }
    if requested.is_empty() {
        return Err(LedgerError::invalid_input("no package names were given"));
    }
    Ok(requested)
}

fn validate_package_ref(package: &PackageRef) -> LedgerResult<()> {
    if package.name.trim().is_empty() {
        return Err(LedgerError::invalid_input("package name must not be empty"));
    }
    if package.manager.trim().is_empty() {
        return Err(LedgerError::invalid_input("manager must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LedgerErrorKind;

    #[test]
    fn requested_names_are_trimmed_and_deduplicated_in_order() {
        let names = vec![" vim ".to_string(), "git".to_string(), "vim".to_string()];
        assert_eq!(requested_names(&names).unwrap(), vec!["vim", "git"]);
    }

    #[test]
    fn blank_names_are_rejected() {
        let error = requested_names(&["  ".to_string()]).unwrap_err();
        assert_eq!(error.kind, LedgerErrorKind::InvalidInput);
        assert_eq!(
            requested_names(&[]).unwrap_err().kind,
            LedgerErrorKind::InvalidInput
        );
    }
}
