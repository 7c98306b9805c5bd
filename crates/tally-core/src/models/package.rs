use std::fmt::{Display, Formatter};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Identity of a tracked package: the same name under two managers is two packages.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageRef {
    pub manager: String,
    pub name: String,
}

impl PackageRef {
    pub fn new(manager: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            manager: manager.into(),
            name: name.into(),
        }
    }
}

impl Display for PackageRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.manager, self.name)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallReason {
    User,
    Dependency,
    Discovered,
}

impl InstallReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Dependency => "dependency",
            Self::Discovered => "discovered",
        }
    }
}

impl std::str::FromStr for InstallReason {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "dependency" => Ok(Self::Dependency),
            "discovered" => Ok(Self::Discovered),
            _ => Err(()),
        }
    }
}

/// Latest known state of one package in the ledger.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CurrentPackage {
    pub package: PackageRef,
    pub origin: Option<String>,
    pub version: Option<String>,
    pub reason: Option<InstallReason>,
    pub location: Option<String>,
    pub comment: Option<String>,
    pub installed_at: Option<SystemTime>,
    pub last_updated: SystemTime,
    pub checksum: Option<String>,
    pub signature: Option<String>,
    pub license: Option<String>,
    pub size_bytes: Option<i64>,
}

impl CurrentPackage {
    pub fn new(package: PackageRef, last_updated: SystemTime) -> Self {
        Self {
            package,
            origin: None,
            version: None,
            reason: None,
            location: None,
            comment: None,
            installed_at: None,
            last_updated,
            checksum: None,
            signature: None,
            license: None,
            size_bytes: None,
        }
    }

    /// Builds a ledger row from what a gateway reported for `manager`.
    pub fn from_record(
        manager: &str,
        record: &PackageRecord,
        fallback_reason: InstallReason,
        now: SystemTime,
    ) -> Self {
        Self {
            package: PackageRef::new(manager, record.name.clone()),
            origin: record.origin.clone(),
            version: record.version.clone(),
            reason: Some(record.reason.unwrap_or(fallback_reason)),
            location: None,
            comment: None,
            installed_at: record.installed_at,
            last_updated: now,
            checksum: record.checksum.clone(),
            signature: record.signature.clone(),
            license: record.license.clone(),
            size_bytes: record.size_bytes,
        }
    }
}

/// Optional fields a gateway may be able to populate on a [`PackageRecord`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    Origin,
    Reason,
    InstalledAt,
    Checksum,
    Signature,
    License,
    SizeBytes,
}

/// Package state as reported by an external package manager.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: Option<String>,
    pub origin: Option<String>,
    pub reason: Option<InstallReason>,
    pub installed_at: Option<SystemTime>,
    pub checksum: Option<String>,
    pub signature: Option<String>,
    pub license: Option<String>,
    pub size_bytes: Option<i64>,
}

impl PackageRecord {
    pub fn new(name: impl Into<String>, version: Option<&str>) -> Self {
        Self {
            name: name.into(),
            version: version.map(str::to_owned),
            ..Self::default()
        }
    }
}

/// A package together with its tag set, in the shape formatters consume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PackageView {
    pub package: CurrentPackage,
    pub tags: Vec<String>,
}
