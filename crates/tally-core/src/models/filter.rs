use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::models::InstallReason;

/// Filter set accepted by package listings. Empty vectors do not constrain.
/// `tags` is match-all; `since`/`before` compare against last-updated time.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PackageFilter {
    pub reasons: Vec<InstallReason>,
    pub managers: Vec<String>,
    pub origins: Vec<String>,
    pub tags: Vec<String>,
    pub since: Option<SystemTime>,
    pub before: Option<SystemTime>,
    pub names: Vec<String>,
}

impl PackageFilter {
    pub fn managers(managers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            managers: managers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn tags(tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}
