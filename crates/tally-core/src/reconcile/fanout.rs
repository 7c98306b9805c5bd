use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::gateways::PackageGateway;
use crate::models::{
    LedgerError, LedgerErrorKind, LedgerResult, OperationKind, PackageRecord, PackageRef,
    RecordField,
};
use crate::orchestration::call_gateway;

/// Joined result of querying every gateway in scope.
#[derive(Clone, Debug, Default)]
pub struct LiveState {
    pub packages: BTreeMap<PackageRef, PackageRecord>,
    /// Managers whose query succeeded, in identifier order.
    pub healthy: Vec<String>,
    pub capabilities: BTreeMap<String, Vec<RecordField>>,
    /// Managers whose query failed; their ledger rows must be left alone.
    pub degraded: BTreeMap<String, LedgerError>,
}

/// Queries every gateway concurrently and waits for all of them. A failing
/// gateway degrades only its own manager; the call fails only when every
/// gateway does.
pub(crate) async fn query_all_gateways(
    gateways: Vec<Arc<dyn PackageGateway>>,
    timeout: Option<Duration>,
    operation: OperationKind,
) -> LedgerResult<LiveState> {
    if gateways.is_empty() {
        return Err(
            LedgerError::invalid_input("no gateways are configured").with_operation(operation)
        );
    }

    let mut pending = Vec::with_capacity(gateways.len());
    for gateway in gateways {
        let manager = gateway.identifier().to_string();
        let capabilities = gateway.declared_capabilities().to_vec();
        let handle = tokio::spawn(call_gateway(gateway, timeout, operation, |gateway| {
            gateway.is_available()?;
            gateway.query_all()
        }));
        pending.push((manager, capabilities, handle));
    }

    let mut state = LiveState::default();
    for (manager, capabilities, handle) in pending {
        let result = handle.await.unwrap_or_else(|join_error| {
            Err(LedgerError::internal(format!("gateway query task failed: {join_error}"))
                .with_manager(manager.clone()))
        });

        match result {
            Ok(records) => {
                tracing::debug!(manager = %manager, packages = records.len(), "gateway answered");
                for record in records {
                    let key = PackageRef::new(manager.clone(), record.name.clone());
                    if state.packages.insert(key, record).is_some() {
                        tracing::debug!(manager = %manager, "gateway reported a package twice");
                    }
                }
                state.capabilities.insert(manager.clone(), capabilities);
                state.healthy.push(manager);
            }
            Err(error) => {
                tracing::warn!(
                    manager = %manager,
                    kind = ?error.kind,
                    message = %error.message,
                    "gateway query failed; leaving its packages untouched"
                );
                state.degraded.insert(manager, error);
            }
        }
    }

    if state.healthy.is_empty() {
        let reasons = state
            .degraded
            .iter()
            .map(|(manager, error)| format!("{manager}: {}", error.message))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(LedgerError::new(
            LedgerErrorKind::GatewayUnavailable,
            format!("every gateway failed ({reasons})"),
        )
        .with_operation(operation));
    }

    state.healthy.sort();
    Ok(state)
}
