pub mod homebrew;
pub(crate) mod process_utils;
pub mod registry;

pub use homebrew::{HOMEBREW_IDENTIFIER, HomebrewGateway};
pub use registry::GatewayRegistry;

use crate::models::{LedgerResult, PackageRecord, RecordField};

pub type GatewayResult<T> = LedgerResult<T>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum GatewayAction {
    Availability,
    Install,
    Remove,
    QueryAll,
}

impl GatewayAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Availability => "availability",
            Self::Install => "install",
            Self::Remove => "remove",
            Self::QueryAll => "query_all",
        }
    }
}

/// Outcome of a mutating call: the exact command that ran, paired with its result.
/// `command_line` is empty only when nothing was executed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutedCommand {
    pub command_line: String,
    pub exit_code: Option<i32>,
    pub result: GatewayResult<()>,
}

impl ExecutedCommand {
    pub fn succeeded(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            exit_code: Some(0),
            result: Ok(()),
        }
    }

    pub fn failed(
        command_line: impl Into<String>,
        exit_code: Option<i32>,
        error: crate::models::LedgerError,
    ) -> Self {
        Self {
            command_line: command_line.into(),
            exit_code,
            result: Err(error),
        }
    }
}

/// Boundary to one external package manager.
///
/// Calls block; the core drives them from a blocking worker and applies
/// its own timeouts around them.
pub trait PackageGateway: Send + Sync {
    /// Stable manager identifier stored in the ledger's `manager` column.
    fn identifier(&self) -> &str;

    /// Optional record fields this gateway can populate.
    fn declared_capabilities(&self) -> &[RecordField];

    fn is_available(&self) -> GatewayResult<()>;

    fn install(&self, names: &[String], options: &[String]) -> ExecutedCommand;

    fn remove(&self, names: &[String], options: &[String]) -> ExecutedCommand;

    fn query_all(&self) -> GatewayResult<Vec<PackageRecord>>;

    /// Installed state for the given names; names that are not installed are omitted.
    fn query_by_name(&self, names: &[String]) -> GatewayResult<Vec<PackageRecord>>;
}
