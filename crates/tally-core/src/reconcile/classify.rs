use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::{CurrentPackage, PackageRecord, PackageRef, RecordField};

/// Fields that can make a tracked package count as updated.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparedField {
    Version,
    Origin,
    Reason,
    Checksum,
    Signature,
    License,
    SizeBytes,
}

impl ComparedField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::Origin => "origin",
            Self::Reason => "reason",
            Self::Checksum => "checksum",
            Self::Signature => "signature",
            Self::License => "license",
            Self::SizeBytes => "size_bytes",
        }
    }

    /// Capability a gateway must declare before the field is compared.
    /// `Version` needs none.
    fn capability(self) -> Option<RecordField> {
        match self {
            Self::Version => None,
            Self::Origin => Some(RecordField::Origin),
            Self::Reason => Some(RecordField::Reason),
            Self::Checksum => Some(RecordField::Checksum),
            Self::Signature => Some(RecordField::Signature),
            Self::License => Some(RecordField::License),
            Self::SizeBytes => Some(RecordField::SizeBytes),
        }
    }

    const ALL: [Self; 7] = [
        Self::Version,
        Self::Origin,
        Self::Reason,
        Self::Checksum,
        Self::Signature,
        Self::License,
        Self::SizeBytes,
    ];
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddedPackage {
    pub package: PackageRef,
    pub live: PackageRecord,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpdatedPackage {
    pub previous: CurrentPackage,
    pub live: PackageRecord,
    pub changed_fields: Vec<ComparedField>,
}

/// Every key seen on either side lands in exactly one bucket. Buckets are
/// ordered by (manager, name).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Classification {
    pub added: Vec<AddedPackage>,
    pub removed: Vec<CurrentPackage>,
    pub updated: Vec<UpdatedPackage>,
    pub unchanged: Vec<PackageRef>,
}

impl Classification {
    /// True when applying would change nothing.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Compares live gateway state against ledger rows for the same managers.
///
/// A field other than `version` is compared only when the owning manager
/// declares the capability, so a gateway that cannot report a field never
/// erases it. Declared fields compare as options: a value the gateway now
/// reports as absent is a change. `reason` is the exception, since the
/// ledger always stores one, and counts only when the live side has it.
pub fn classify(
    live: &BTreeMap<PackageRef, PackageRecord>,
    ledger: &BTreeMap<PackageRef, CurrentPackage>,
    capabilities: &BTreeMap<String, Vec<RecordField>>,
) -> Classification {
    let keys = live.keys().chain(ledger.keys()).collect::<BTreeSet<_>>();
    let mut classification = Classification::default();

    for key in keys {
        match (live.get(key), ledger.get(key)) {
            (Some(record), None) => classification.added.push(AddedPackage {
                package: key.clone(),
                live: record.clone(),
            }),
            (None, Some(previous)) => classification.removed.push(previous.clone()),
            (Some(record), Some(previous)) => {
                let declared = capabilities
                    .get(&key.manager)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let changed_fields = changed_fields(record, previous, declared);
                if changed_fields.is_empty() {
                    classification.unchanged.push(key.clone());
                } else {
                    classification.updated.push(UpdatedPackage {
                        previous: previous.clone(),
                        live: record.clone(),
                        changed_fields,
                    });
                }
            }
            (None, None) => {}
        }
    }

    classification
}

fn changed_fields(
    live: &PackageRecord,
    previous: &CurrentPackage,
    declared: &[RecordField],
) -> Vec<ComparedField> {
    ComparedField::ALL
        .into_iter()
        .filter(|field| {
            field
                .capability()
                .is_none_or(|capability| declared.contains(&capability))
        })
        .filter(|field| match field {
            ComparedField::Version => live.version != previous.version,
            ComparedField::Origin => live.origin != previous.origin,
            ComparedField::Reason => live.reason.is_some() && live.reason != previous.reason,
            ComparedField::Checksum => live.checksum != previous.checksum,
            ComparedField::Signature => live.signature != previous.signature,
            ComparedField::License => live.license != previous.license,
            ComparedField::SizeBytes => live.size_bytes != previous.size_bytes,
        })
        .collect()
}

/// Applies the merge rule for an updated package: changed fields take the
/// live value (absent included), the original install time is kept once set, and everything
/// the gateway did not report stays as it was.
pub fn merge_update(update: &UpdatedPackage, now: std::time::SystemTime) -> CurrentPackage {
    let mut merged = update.previous.clone();
    for field in &update.changed_fields {
        match field {
            ComparedField::Version => merged.version = update.live.version.clone(),
            ComparedField::Origin => merged.origin = update.live.origin.clone(),
            ComparedField::Reason => merged.reason = update.live.reason,
            ComparedField::Checksum => merged.checksum = update.live.checksum.clone(),
            ComparedField::Signature => merged.signature = update.live.signature.clone(),
            ComparedField::License => merged.license = update.live.license.clone(),
            ComparedField::SizeBytes => merged.size_bytes = update.live.size_bytes,
        }
    }
    merged.installed_at = update.previous.installed_at.or(update.live.installed_at);
    merged.last_updated = now;
    merged
}
