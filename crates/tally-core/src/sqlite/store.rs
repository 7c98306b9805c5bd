use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::models::{
    CommandHistory, CurrentPackage, LedgerError, LedgerErrorKind, LedgerResult, LogEntry,
    LogQuery, PackageFilter, PackageView, Tag,
};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration, migrations};
use crate::sqlite::{history, integrity, log, packages, tags};

const MIGRATIONS_TABLE: &str = "tally_schema_migrations";
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Single-file ledger database.
///
/// Every operation opens its own connection. Reads run in a deferred
/// transaction and may proceed alongside each other; writes are serialised
/// through a process-local lock and an IMMEDIATE transaction, so at most one
/// write transaction is open at a time.
pub struct LedgerStore {
    database_path: PathBuf,
    busy_timeout: Duration,
    write_lock: Mutex<()>,
}

impl LedgerStore {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            write_lock: Mutex::new(()),
        }
    }

    /// How long a statement waits on a locked database before failing with `Timeout`.
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    pub fn planned_migrations(&self, from_version: i64) -> Vec<&'static SqliteMigration> {
        migrations()
            .iter()
            .filter(|entry| entry.version > from_version)
            .collect()
    }

    /// Applies pending migrations and reports the resulting schema version.
    pub fn migrate_to_latest(&self) -> LedgerResult<i64> {
        self.apply_migration(current_schema_version())?;
        let version = self.current_version()?;
        tracing::info!(
            path = %self.database_path.display(),
            schema_version = version,
            "ledger schema is up to date"
        );
        Ok(version)
    }

    pub fn current_version(&self) -> LedgerResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            Ok(read_current_version(connection)?)
        })
    }

    pub fn apply_migration(&self, target_version: i64) -> LedgerResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error_text(
                "apply_migration",
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        let _guard = self.lock_writer("apply_migration")?;
        self.with_connection("apply_migration", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version > current_version {
                for version in (current_version + 1)..=target_version {
                    let entry = defined_migration(version)?;
                    tracing::debug!(version, name = entry.name, "applying ledger migration");
                    apply_up_migration(connection, entry)?;
                }
            } else {
                for version in ((target_version + 1)..=current_version).rev() {
                    let entry = defined_migration(version)?;
                    tracing::debug!(version, name = entry.name, "reverting ledger migration");
                    apply_down_migration(connection, entry)?;
                }
            }

            Ok(())
        })
    }

    /// Runs `operation` as an isolated read.
    pub fn read<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&Connection) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        self.with_connection(operation_name, |connection| {
            ensure_schema_ready(connection)?;
            let transaction = connection.transaction_with_behavior(TransactionBehavior::Deferred)?;
            let value = operation(&transaction)?;
            transaction.finish()?;
            Ok(value)
        })
    }

    /// Runs `operation` inside one write transaction. The transaction commits
    /// when `operation` returns `Ok` and rolls back otherwise.
    pub fn write<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&Transaction<'_>) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let _guard = self.lock_writer(operation_name)?;
        self.with_connection(operation_name, |connection| {
            ensure_schema_ready(connection)?;
            let transaction =
                connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
            match operation(&transaction) {
                Ok(value) => {
                    transaction.commit().map_err(|error| {
                        LedgerError::new(
                            LedgerErrorKind::TransactionCommitFailed,
                            format!("sqlite store '{operation_name}' failed to commit: {error}"),
                        )
                    })?;
                    Ok(value)
                }
                Err(error) => {
                    tracing::debug!(
                        operation = operation_name,
                        kind = ?error.kind,
                        "rolling back ledger transaction"
                    );
                    drop(transaction);
                    Err(error)
                }
            }
        })
    }

    pub fn package(&self, name: &str, manager: Option<&str>) -> LedgerResult<CurrentPackage> {
        self.read("package", |connection| packages::find(connection, name, manager))
    }

    pub fn list_packages(&self, filter: &PackageFilter) -> LedgerResult<Vec<CurrentPackage>> {
        self.read("list_packages", |connection| packages::list(connection, filter))
    }

    pub fn list_package_views(&self, filter: &PackageFilter) -> LedgerResult<Vec<PackageView>> {
        self.read("list_package_views", |connection| {
            let listed = packages::list(connection, filter)?;
            let keys = listed
                .iter()
                .map(|package| package.package.clone())
                .collect::<Vec<_>>();
            let mut tag_sets = tags::for_packages(connection, &keys)?;
            Ok(listed
                .into_iter()
                .map(|package| {
                    let tags = tag_sets.remove(&package.package).unwrap_or_default();
                    PackageView { package, tags }
                })
                .collect())
        })
    }

    pub fn list_tags(&self) -> LedgerResult<Vec<Tag>> {
        self.read("list_tags", tags::list_with_counts)
    }

    pub fn list_log(&self, query: &LogQuery) -> LedgerResult<Vec<LogEntry>> {
        self.read("list_log", |connection| log::list(connection, query))
    }

    pub fn command(&self, id: crate::models::CommandId) -> LedgerResult<CommandHistory> {
        self.read("command", |connection| history::get(connection, id))
    }

    pub fn recent_commands(&self, limit: usize) -> LedgerResult<Vec<CommandHistory>> {
        self.read("recent_commands", |connection| {
            history::list_recent(connection, limit)
        })
    }

    /// Invocations that recorded a start but never a finish.
    pub fn interrupted_commands(&self) -> LedgerResult<Vec<CommandHistory>> {
        self.read("interrupted_commands", history::list_interrupted)
    }

    /// Deletes finished command history older than `cutoff`; log rows keep
    /// their content and lose the back-reference.
    pub fn prune_command_history(&self, cutoff: SystemTime) -> LedgerResult<usize> {
        self.write("prune_command_history", |transaction| {
            history::prune_finished_before(transaction, cutoff)
        })
    }

    pub fn integrity_check(&self) -> LedgerResult<String> {
        self.with_connection("integrity_check", |connection| integrity::check(connection))
    }

    fn lock_writer(&self, operation_name: &str) -> LedgerResult<std::sync::MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|_| {
            LedgerError::internal(format!(
                "sqlite store '{operation_name}' found the writer lock poisoned"
            ))
        })
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let mut connection = open_connection(&self.database_path, self.busy_timeout)
            .map_err(|error| storage_error(operation_name, error))?;
        operation(&mut connection).map_err(|error| attribute_operation(operation_name, error))
    }
}

fn open_connection(database_path: &Path, busy_timeout: Duration) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    let connection = Connection::open(database_path)?;
    connection.busy_timeout(busy_timeout)?;
    connection.execute_batch(
        "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
",
    )?;
    Ok(connection)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
"
    ))
}

fn ensure_schema_ready(connection: &Connection) -> LedgerResult<()> {
    ensure_migrations_table(connection)?;
    let version = read_current_version(connection)?;
    if version < current_schema_version() {
        return Err(storage_error_text(
            "ensure_schema_ready",
            format!(
                "ledger schema is at version {version}, expected {}; apply migrations first",
                current_schema_version()
            ),
        ));
    }
    Ok(())
}

fn read_current_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn defined_migration(version: i64) -> LedgerResult<&'static SqliteMigration> {
    migration(version).ok_or_else(|| {
        storage_error_text(
            "apply_migration",
            format!("migration version '{version}' is not defined"),
        )
    })
}

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.up_sql)?;
    transaction.execute(
        &format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
             VALUES (?1, ?2, strftime('%s', 'now'))"
        ),
        (migration.version, migration.name),
    )?;
    transaction.commit()
}

fn apply_down_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()
}

fn storage_error(operation: &str, error: rusqlite::Error) -> LedgerError {
    let converted = LedgerError::from(error);
    LedgerError {
        message: format!("sqlite store '{operation}' failed: {}", converted.message),
        ..converted
    }
}

fn storage_error_text(operation: &str, message: impl AsRef<str>) -> LedgerError {
    LedgerError::new(
        LedgerErrorKind::StorageFailure,
        format!("sqlite store '{operation}' failed: {}", message.as_ref()),
    )
}

fn attribute_operation(operation: &str, error: LedgerError) -> LedgerError {
    match error.kind {
        LedgerErrorKind::StorageFailure | LedgerErrorKind::Timeout
            if !error.message.starts_with("sqlite store") =>
        {
            LedgerError {
                message: format!("sqlite store '{operation}' failed: {}", error.message),
                ..error
            }
        }
        _ => error,
    }
}
