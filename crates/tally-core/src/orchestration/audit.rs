use std::sync::Arc;

use crate::clock::Clock;
use crate::models::{CommandId, LedgerResult};
use crate::orchestration::blocking;
use crate::sqlite::{LedgerStore, history};

/// Appends and finalizes command history rows. Each call is its own write
/// transaction, never shared with the operation's state changes, so the row
/// reflects the true outcome even when the main commit fails.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<LedgerStore>,
    clock: Arc<dyn Clock>,
    tool_version: String,
}

impl AuditRecorder {
    pub fn new(store: Arc<LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_tool_version(mut self, tool_version: impl Into<String>) -> Self {
        self.tool_version = tool_version.into();
        self
    }

    pub fn tool_version(&self) -> &str {
        &self.tool_version
    }

    pub async fn start(&self, invocation: &str) -> LedgerResult<CommandId> {
        let store = self.store.clone();
        let invocation = invocation.to_string();
        let tool_version = self.tool_version.clone();
        let now = self.clock.now();
        blocking("audit_start", move || {
            store.write("audit_start", |transaction| {
                history::start(transaction, &invocation, &tool_version, now)
            })
        })
        .await
    }

    pub async fn attach_external_command(
        &self,
        command_id: CommandId,
        command_line: &str,
    ) -> LedgerResult<()> {
        let store = self.store.clone();
        let command_line = command_line.to_string();
        blocking("audit_attach_external_command", move || {
            store.write("audit_attach_external_command", |transaction| {
                history::attach_pm_command(transaction, command_id, &command_line)
            })
        })
        .await
    }

    pub async fn finish(
        &self,
        command_id: CommandId,
        exit_code: i32,
        error_message: Option<&str>,
        details: Option<&str>,
    ) -> LedgerResult<()> {
        let store = self.store.clone();
        let now = self.clock.now();
        let error_message = error_message.map(str::to_owned);
        let details = details.map(str::to_owned);
        blocking("audit_finish", move || {
            store.write("audit_finish", |transaction| {
                history::finish(
                    transaction,
                    command_id,
                    now,
                    exit_code,
                    error_message.as_deref(),
                    details.as_deref(),
                )
            })
        })
        .await
    }

    /// Like [`finish`](Self::finish), but a failure only leaves the row open
    /// (an interrupted invocation) and is logged instead of returned.
    pub(crate) async fn finish_logged(
        &self,
        command_id: CommandId,
        exit_code: i32,
        error_message: Option<&str>,
        details: Option<&str>,
    ) {
        if let Err(error) = self
            .finish(command_id, exit_code, error_message, details)
            .await
        {
            tracing::warn!(
                command_id = command_id.0,
                kind = ?error.kind,
                message = %error.message,
                "failed to finalize command history"
            );
        }
    }
}
