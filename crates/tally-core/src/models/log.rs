use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::models::{CommandId, CurrentPackage, InstallReason, PackageRef};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    Installed,
    Removed,
    CommentChanged,
    TagsUpdated,
    ManualAdd,
    ManualRemoveLog,
    SyncAdd,
    SyncRemove,
    SyncUpdate,
    Init,
}

impl LogAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Removed => "removed",
            Self::CommentChanged => "comment_changed",
            Self::TagsUpdated => "tags_updated",
            Self::ManualAdd => "manual_add",
            Self::ManualRemoveLog => "manual_remove_log",
            Self::SyncAdd => "sync_add",
            Self::SyncRemove => "sync_remove",
            Self::SyncUpdate => "sync_update",
            Self::Init => "init",
        }
    }
}

impl std::str::FromStr for LogAction {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "installed" => Ok(Self::Installed),
            "removed" => Ok(Self::Removed),
            "comment_changed" => Ok(Self::CommentChanged),
            "tags_updated" => Ok(Self::TagsUpdated),
            "manual_add" => Ok(Self::ManualAdd),
            "manual_remove_log" => Ok(Self::ManualRemoveLog),
            "sync_add" => Ok(Self::SyncAdd),
            "sync_remove" => Ok(Self::SyncRemove),
            "sync_update" => Ok(Self::SyncUpdate),
            "init" => Ok(Self::Init),
            _ => Err(()),
        }
    }
}

/// Snapshot of a package's descriptive fields at the time of an event.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PackageSnapshot {
    pub package: PackageRef,
    pub origin: Option<String>,
    pub version: Option<String>,
    pub reason: Option<InstallReason>,
    pub location: Option<String>,
    pub comment: Option<String>,
    pub installed_at: Option<SystemTime>,
    pub checksum: Option<String>,
    pub signature: Option<String>,
    pub license: Option<String>,
    pub size_bytes: Option<i64>,
}

impl From<&CurrentPackage> for PackageSnapshot {
    fn from(current: &CurrentPackage) -> Self {
        Self {
            package: current.package.clone(),
            origin: current.origin.clone(),
            version: current.version.clone(),
            reason: current.reason,
            location: current.location.clone(),
            comment: current.comment.clone(),
            installed_at: current.installed_at,
            checksum: current.checksum.clone(),
            signature: current.signature.clone(),
            license: current.license.clone(),
            size_bytes: current.size_bytes,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NewLogEntry {
    pub command_id: Option<CommandId>,
    pub timestamp: SystemTime,
    pub action: LogAction,
    pub snapshot: PackageSnapshot,
}

impl NewLogEntry {
    pub fn for_package(
        command_id: CommandId,
        timestamp: SystemTime,
        action: LogAction,
        package: &CurrentPackage,
    ) -> Self {
        Self {
            command_id: Some(command_id),
            timestamp,
            action,
            snapshot: PackageSnapshot::from(package),
        }
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.snapshot.comment = Some(comment.into());
        self
    }
}

/// Append-only event record.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub command_id: Option<CommandId>,
    pub timestamp: SystemTime,
    pub action: LogAction,
    pub snapshot: PackageSnapshot,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct LogQuery {
    pub name: Option<String>,
    pub manager: Option<String>,
    pub command_id: Option<CommandId>,
    pub actions: Vec<LogAction>,
    pub limit: Option<usize>,
}
