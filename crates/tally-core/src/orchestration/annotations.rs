use crate::models::{
    LedgerError, LedgerResult, LogAction, NewLogEntry, OperationKind, normalize_tag,
};
use crate::orchestration::{OperationContext, OperationReport, Orchestrator, blocking};
use crate::sqlite::{log, packages, tags};

/// Tags to attach to and detach from one package.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TagChanges {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl TagChanges {
    pub fn add(tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            add: tags.into_iter().map(Into::into).collect(),
            remove: Vec::new(),
        }
    }

    pub fn remove(tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            add: Vec::new(),
            remove: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn and_remove(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.remove.extend(tags.into_iter().map(Into::into));
        self
    }

    fn normalized(&self) -> LedgerResult<(Vec<String>, Vec<String>)> {
        let normalize = |raw: &[String]| -> LedgerResult<Vec<String>> {
            let mut normalized = Vec::with_capacity(raw.len());
            for tag in raw {
                let name = normalize_tag(tag)
                    .ok_or_else(|| LedgerError::invalid_input("tag names must not be empty"))?;
                if !normalized.contains(&name) {
                    normalized.push(name);
                }
            }
            Ok(normalized)
        };
        let add = normalize(&self.add)?;
        let remove = normalize(&self.remove)?;
        if add.is_empty() && remove.is_empty() {
            return Err(LedgerError::invalid_input("no tags to add or remove"));
        }
        let conflicting = add
            .iter()
            .filter(|tag| remove.contains(tag))
            .map(String::as_str)
            .collect::<Vec<_>>();
        if !conflicting.is_empty() {
            return Err(LedgerError::invalid_input(format!(
                "tags cannot be added and removed at once: {}",
                conflicting.join(", ")
            )));
        }
        Ok((add, remove))
    }
}

impl Orchestrator {
    /// Applies tag additions and removals to one package as a single
    /// operation. Both directions are idempotent; one log entry summarises
    /// whatever actually changed.
    pub async fn update_tags(
        &self,
        ctx: &OperationContext,
        name: &str,
        manager: Option<&str>,
        changes: &TagChanges,
    ) -> LedgerResult<OperationReport> {
        self.audited(ctx, OperationKind::Tag, |command_id| async move {
            let (add, remove) = changes.normalized()?;
            ctx.ensure_not_cancelled(OperationKind::Tag)?;

            let store = self.store.clone();
            let now = self.clock.now();
            let name = name.to_string();
            let manager = manager.map(str::to_owned);
            let (package, summary) = blocking("update_tags", move || {
                store.write("update_tags", |transaction| {
                    let existing = packages::find(transaction, &name, manager.as_deref())?;
                    let key = existing.package.clone();

                    let mut added = Vec::new();
                    for tag in &add {
                        let tag_id = tags::find_or_create(transaction, tag)?;
                        if tags::add_to_package(transaction, &key, tag_id, now)? {
                            added.push(tag.as_str());
                        }
                    }

                    let mut removed = Vec::new();
                    for tag in &remove {
                        match tags::find(transaction, tag)? {
                            Some(tag_id) => {
                                if tags::remove_from_package(transaction, &key, tag_id, now)? {
                                    removed.push(tag.as_str());
                                }
                            }
                            None => packages::touch(transaction, &key, now)?,
                        }
                    }

                    let summary = summarize(&added, &removed);
                    if let Some(summary) = &summary {
                        log::insert(
                            transaction,
                            &NewLogEntry::for_package(
                                command_id,
                                now,
                                LogAction::TagsUpdated,
                                &existing,
                            )
                            .comment(summary.clone()),
                        )?;
                    }
                    Ok((key, summary))
                })
            })
            .await?;

            tracing::info!(
                command_id = command_id.0,
                package = %package,
                changed = summary.is_some(),
                "tags updated"
            );
            let report = if summary.is_some() {
                OperationReport {
                    command_id,
                    changed: vec![package],
                    skipped: Vec::new(),
                }
            } else {
                OperationReport {
                    command_id,
                    changed: Vec::new(),
                    skipped: vec![package],
                }
            };
            Ok((report, None))
        })
        .await
    }

    /// Sets or clears (blank `comment`) a package's comment.
    pub async fn set_comment(
        &self,
        ctx: &OperationContext,
        name: &str,
        manager: Option<&str>,
        comment: Option<&str>,
    ) -> LedgerResult<OperationReport> {
        self.audited(ctx, OperationKind::Comment, |command_id| async move {
            ctx.ensure_not_cancelled(OperationKind::Comment)?;

            let store = self.store.clone();
            let now = self.clock.now();
            let name = name.to_string();
            let manager = manager.map(str::to_owned);
            let comment = comment
                .map(str::trim)
                .filter(|comment| !comment.is_empty())
                .map(str::to_owned);
            let package = blocking("set_comment", move || {
                store.write("set_comment", |transaction| {
                    let mut existing = packages::find(transaction, &name, manager.as_deref())?;
                    packages::set_comment(transaction, &existing.package, comment.as_deref(), now)?;
                    existing.comment = comment;
                    existing.last_updated = now;
                    log::insert(
                        transaction,
                        &NewLogEntry::for_package(
                            command_id,
                            now,
                            LogAction::CommentChanged,
                            &existing,
                        ),
                    )?;
                    Ok(existing.package)
                })
            })
            .await?;

            tracing::info!(command_id = command_id.0, package = %package, "comment updated");
            Ok((
                OperationReport {
                    command_id,
                    changed: vec![package],
                    skipped: Vec::new(),
                },
                None,
            ))
        })
        .await
    }
}

fn summarize(added: &[&str], removed: &[&str]) -> Option<String> {
    let mut parts = Vec::new();
    if !added.is_empty() {
        parts.push(format!("added: {}", added.join(", ")));
    }
    if !removed.is_empty() {
        parts.push(format!("removed: {}", removed.join(", ")));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}
