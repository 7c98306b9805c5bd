use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Install,
    Remove,
    Tag,
    Comment,
    ManualAdd,
    ManualRemove,
    Discover,
    Sync,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Remove => "remove",
            Self::Tag => "tag",
            Self::Comment => "comment",
            Self::ManualAdd => "manual_add",
            Self::ManualRemove => "manual_remove",
            Self::Discover => "discover",
            Self::Sync => "sync",
        }
    }
}
