pub mod clock;
pub mod execution;
pub mod gateways;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod reconcile;
pub mod settings;
pub mod sqlite;
