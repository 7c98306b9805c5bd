use std::time::SystemTime;

use rusqlite::{Connection, Row, params};

use crate::models::{CommandHistory, CommandId, LedgerError, LedgerResult};
use crate::sqlite::codec::{
    from_optional_unix_seconds, from_unix_seconds, to_i64, to_unix_seconds,
};

const HISTORY_COLUMNS: &str = "id, start_ts, end_ts, version, command_string, pm_command_string, \
     exit_code, error_message, details";

pub fn start(
    connection: &Connection,
    invocation: &str,
    tool_version: &str,
    now: SystemTime,
) -> LedgerResult<CommandId> {
    connection.execute(
        "INSERT INTO command_history (start_ts, version, command_string) VALUES (?1, ?2, ?3)",
        params![to_unix_seconds(now)?, tool_version, invocation],
    )?;
    Ok(CommandId(connection.last_insert_rowid()))
}

pub fn attach_pm_command(
    connection: &Connection,
    id: CommandId,
    pm_command: &str,
) -> LedgerResult<()> {
    let updated = connection.execute(
        "UPDATE command_history SET pm_command_string = ?2 WHERE id = ?1",
        params![id.0, pm_command],
    )?;
    ensure_updated(updated, id)
}

/// Records the end of an invocation. Only rows that were never finished
/// are updated; a second finish for the same id is rejected.
pub fn finish(
    connection: &Connection,
    id: CommandId,
    now: SystemTime,
    exit_code: i32,
    error_message: Option<&str>,
    details: Option<&str>,
) -> LedgerResult<()> {
    let updated = connection.execute(
        "
UPDATE command_history
SET end_ts = ?2, exit_code = ?3, error_message = ?4, details = ?5
WHERE id = ?1 AND end_ts IS NULL
",
        params![id.0, to_unix_seconds(now)?, exit_code, error_message, details],
    )?;
    if updated == 0 {
        let existing = get(connection, id)?;
        if existing.finished_at.is_some() {
            return Err(LedgerError::invalid_input(format!(
                "command {} was already finished",
                id.0
            )));
        }
    }
    Ok(())
}

pub fn get(connection: &Connection, id: CommandId) -> LedgerResult<CommandHistory> {
    let mut statement = connection.prepare(&format!(
        "SELECT {HISTORY_COLUMNS} FROM command_history WHERE id = ?1"
    ))?;
    let mut rows = statement.query([id.0])?;
    match rows.next()? {
        Some(row) => Ok(history_from_row(row)?),
        None => Err(LedgerError::not_found(format!(
            "command history entry {} does not exist",
            id.0
        ))),
    }
}

pub fn list_recent(connection: &Connection, limit: usize) -> LedgerResult<Vec<CommandHistory>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let mut statement = connection.prepare(&format!(
        "SELECT {HISTORY_COLUMNS} FROM command_history ORDER BY id DESC LIMIT ?1"
    ))?;
    let rows = statement.query_map([to_i64(limit)?], history_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn list_interrupted(connection: &Connection) -> LedgerResult<Vec<CommandHistory>> {
    let mut statement = connection.prepare(&format!(
        "SELECT {HISTORY_COLUMNS} FROM command_history WHERE end_ts IS NULL ORDER BY id"
    ))?;
    let rows = statement.query_map([], history_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Deletes finished entries that started before `cutoff`. Interrupted
/// entries are kept as evidence.
pub fn prune_finished_before(connection: &Connection, cutoff: SystemTime) -> LedgerResult<usize> {
    let deleted = connection.execute(
        "DELETE FROM command_history WHERE end_ts IS NOT NULL AND start_ts < ?1",
        [to_unix_seconds(cutoff)?],
    )?;
    tracing::info!(deleted, "pruned finished command history");
    Ok(deleted)
}

fn ensure_updated(updated: usize, id: CommandId) -> LedgerResult<()> {
    if updated == 0 {
        return Err(LedgerError::not_found(format!(
            "command history entry {} does not exist",
            id.0
        )));
    }
    Ok(())
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<CommandHistory> {
    Ok(CommandHistory {
        id: CommandId(row.get(0)?),
        started_at: from_unix_seconds(row.get(1)?)?,
        finished_at: from_optional_unix_seconds(row.get(2)?)?,
        tool_version: row.get(3)?,
        invocation: row.get(4)?,
        pm_command: row.get(5)?,
        exit_code: row.get(6)?,
        error_message: row.get(7)?,
        details: row.get(8)?,
    })
}
