pub mod error;
pub mod filter;
pub mod history;
pub mod log;
pub mod operation;
pub mod package;
pub mod tag;

pub use error::{LedgerError, LedgerErrorKind, LedgerResult};
pub use filter::PackageFilter;
pub use history::{CommandHistory, CommandId};
pub use log::{LogAction, LogEntry, LogQuery, NewLogEntry, PackageSnapshot};
pub use operation::OperationKind;
pub use package::{
    CurrentPackage, InstallReason, PackageRecord, PackageRef, PackageView, RecordField,
};
pub use tag::{Tag, TagId, normalize_tag};
