use std::collections::BTreeMap;
use std::sync::Arc;

use crate::gateways::PackageGateway;
use crate::models::{LedgerError, LedgerErrorKind, LedgerResult};

/// Configured gateways keyed by identifier.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: BTreeMap<String, Arc<dyn PackageGateway>>,
}

impl GatewayRegistry {
    pub fn new(
        gateways: impl IntoIterator<Item = Arc<dyn PackageGateway>>,
    ) -> LedgerResult<Self> {
        let mut mapped = BTreeMap::new();
        for gateway in gateways {
            let identifier = gateway.identifier().to_string();
            if identifier.trim().is_empty() {
                return Err(LedgerError::invalid_input(
                    "gateway identifier must not be empty",
                ));
            }
            if mapped.insert(identifier.clone(), gateway).is_some() {
                return Err(LedgerError::invalid_input(format!(
                    "duplicate gateway registration for manager '{identifier}'"
                ))
                .with_manager(identifier));
            }
        }
        Ok(Self { gateways: mapped })
    }

    pub fn get(&self, manager: &str) -> LedgerResult<Arc<dyn PackageGateway>> {
        self.gateways.get(manager).cloned().ok_or_else(|| {
            LedgerError::new(
                LedgerErrorKind::GatewayUnavailable,
                format!("no gateway is registered for manager '{manager}'"),
            )
            .with_manager(manager)
        })
    }

    /// Gateways for the requested managers, or every gateway when `managers` is empty.
    pub fn scope(&self, managers: &[String]) -> LedgerResult<Vec<Arc<dyn PackageGateway>>> {
        if managers.is_empty() {
            return Ok(self.gateways.values().cloned().collect());
        }
        let mut selected = Vec::with_capacity(managers.len());
        for manager in managers {
            let gateway = self.get(manager)?;
            if !selected
                .iter()
                .any(|existing: &Arc<dyn PackageGateway>| existing.identifier() == manager)
            {
                selected.push(gateway);
            }
        }
        Ok(selected)
    }
}
