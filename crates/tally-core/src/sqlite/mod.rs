mod codec;
pub mod history;
pub mod integrity;
pub mod log;
pub mod migrations;
pub mod packages;
pub mod store;
pub mod tags;

pub use migrations::{SqliteMigration, current_schema_version, migration, migrations};
pub use store::LedgerStore;
