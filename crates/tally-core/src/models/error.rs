use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::OperationKind;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerErrorKind {
    NotFound,
    Ambiguous,
    GatewayUnavailable,
    GatewayExecutionFailed,
    ConstraintViolation,
    IntegrityCheckFailed,
    TransactionCommitFailed,
    Timeout,
    Cancelled,
    InvalidInput,
    ParseFailure,
    StorageFailure,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct LedgerError {
    pub kind: LedgerErrorKind,
    pub message: String,
    pub manager: Option<String>,
    pub operation: Option<OperationKind>,
    pub exit_code: Option<i32>,
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn new(kind: LedgerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            manager: None,
            operation: None,
            exit_code: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(LedgerErrorKind::NotFound, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(LedgerErrorKind::InvalidInput, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(LedgerErrorKind::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(LedgerErrorKind::Internal, message)
    }

    pub fn with_manager(mut self, manager: impl Into<String>) -> Self {
        self.manager.get_or_insert(manager.into());
        self
    }

    pub fn with_operation(mut self, operation: OperationKind) -> Self {
        self.operation.get_or_insert(operation);
        self
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    /// Exit code recorded in command history when an operation ends with this error.
    pub fn exit_code(&self) -> i32 {
        match (self.exit_code, self.kind) {
            (Some(code), _) if code != 0 => code,
            (_, LedgerErrorKind::Cancelled) => 130,
            (_, LedgerErrorKind::Timeout) => 124,
            _ => 1,
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(error: rusqlite::Error) -> Self {
        let kind = match error.sqlite_error_code() {
            Some(rusqlite::ErrorCode::ConstraintViolation) => LedgerErrorKind::ConstraintViolation,
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) => {
                LedgerErrorKind::Timeout
            }
            _ => match &error {
                rusqlite::Error::QueryReturnedNoRows => LedgerErrorKind::NotFound,
                _ => LedgerErrorKind::StorageFailure,
            },
        };
        Self::new(kind, error.to_string())
    }
}
