pub mod annotations;
pub mod audit;
pub mod packages;

pub use annotations::TagChanges;
pub use audit::AuditRecorder;
pub use packages::ManualEntry;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::gateways::{GatewayRegistry, GatewayResult, PackageGateway};
use crate::models::{
    CommandId, LedgerError, LedgerErrorKind, LedgerResult, OperationKind, PackageRef,
};
use crate::settings::LedgerSettings;
use crate::sqlite::LedgerStore;

/// Caller-supplied limits for gateway calls. `None` waits indefinitely.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OperationTimeouts {
    pub gateway_query: Option<Duration>,
    pub gateway_mutation: Option<Duration>,
}

#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Per-invocation inputs shared by every operation.
#[derive(Clone, Debug)]
pub struct OperationContext {
    /// Full invocation string recorded in command history.
    pub invocation: String,
    pub cancellation: CancellationToken,
}

impl OperationContext {
    pub fn new(invocation: impl Into<String>) -> Self {
        Self {
            invocation: invocation.into(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub(crate) fn ensure_not_cancelled(&self, operation: OperationKind) -> LedgerResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(LedgerError::cancelled(format!(
                "{} was cancelled before it changed anything",
                operation.as_str()
            ))
            .with_operation(operation));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationReport {
    pub command_id: CommandId,
    /// Packages whose ledger state this operation changed.
    pub changed: Vec<PackageRef>,
    /// Requested packages that were left alone.
    pub skipped: Vec<PackageRef>,
}

/// Runs the mutating workflows: install, remove, tag, comment, manual add
/// and manual remove. Each call records its own command history row.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) store: Arc<LedgerStore>,
    pub(crate) gateways: GatewayRegistry,
    pub(crate) audit: AuditRecorder,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) timeouts: OperationTimeouts,
}

impl Orchestrator {
    pub fn new(store: Arc<LedgerStore>, gateways: GatewayRegistry) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            audit: AuditRecorder::new(store.clone(), clock.clone()),
            store,
            gateways,
            clock,
            timeouts: OperationTimeouts::default(),
        }
    }

    /// Opens the configured ledger, migrating it to the current schema, and
    /// applies the configured tool version and gateway timeouts.
    pub fn from_settings(settings: &LedgerSettings, gateways: GatewayRegistry) -> LedgerResult<Self> {
        let store = LedgerStore::new(settings.database_path.clone())
            .with_busy_timeout(settings.store_busy_timeout());
        store.migrate_to_latest()?;
        Ok(Self::new(Arc::new(store), gateways)
            .with_tool_version(settings.tool_version.clone())
            .with_timeouts(settings.timeouts()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.audit = AuditRecorder::new(self.store.clone(), clock.clone())
            .with_tool_version(self.audit.tool_version().to_string());
        self.clock = clock;
        self
    }

    pub fn with_tool_version(mut self, tool_version: impl Into<String>) -> Self {
        self.audit = self.audit.with_tool_version(tool_version);
        self
    }

    pub fn with_timeouts(mut self, timeouts: OperationTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    pub fn timeouts(&self) -> OperationTimeouts {
        self.timeouts
    }

    pub fn audit(&self) -> &AuditRecorder {
        &self.audit
    }

    /// Starts the audit row, runs `body`, then finalizes the row in its own
    /// commit whatever the outcome.
    pub(crate) async fn audited<T, F, Fut>(
        &self,
        ctx: &OperationContext,
        operation: OperationKind,
        body: F,
    ) -> LedgerResult<T>
    where
        F: FnOnce(CommandId) -> Fut,
        Fut: Future<Output = LedgerResult<(T, Option<String>)>>,
    {
        let command_id = self.audit.start(&ctx.invocation).await?;
        tracing::debug!(
            command_id = command_id.0,
            operation = operation.as_str(),
            "operation started"
        );

        let outcome = body(command_id)
            .await
            .map_err(|error| error.with_operation(operation));
        match outcome {
            Ok((value, details)) => {
                self.audit
                    .finish_logged(command_id, 0, None, details.as_deref())
                    .await;
                Ok(value)
            }
            Err(error) => {
                tracing::warn!(
                    command_id = command_id.0,
                    operation = operation.as_str(),
                    kind = ?error.kind,
                    message = %error.message,
                    "operation failed"
                );
                self.audit
                    .finish_logged(command_id, error.exit_code(), Some(&error.message), None)
                    .await;
                Err(error)
            }
        }
    }
}

/// Runs blocking ledger work off the async executor.
pub(crate) async fn blocking<T, F>(label: &'static str, work: F) -> LedgerResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> LedgerResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|join_error| {
        LedgerError::internal(format!("{label} worker join failure: {join_error}"))
    })?
}

/// Drives one synchronous gateway call from a blocking worker, bounded by
/// `timeout`. A timed-out call is reported as `Timeout`; the worker itself
/// is left to finish in the background.
pub(crate) async fn call_gateway<T, F>(
    gateway: Arc<dyn PackageGateway>,
    timeout: Option<Duration>,
    operation: OperationKind,
    call: F,
) -> GatewayResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn PackageGateway) -> GatewayResult<T> + Send + 'static,
{
    let manager = gateway.identifier().to_string();
    let worker = blocking(operation.as_str(), move || call(gateway.as_ref()));

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, worker).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::new(
                LedgerErrorKind::Timeout,
                format!(
                    "gateway '{manager}' did not answer within {}ms",
                    limit.as_millis()
                ),
            )),
        },
        None => worker.await,
    };

    result.map_err(|error| error.with_manager(manager).with_operation(operation))
}
