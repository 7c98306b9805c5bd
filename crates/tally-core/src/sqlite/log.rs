use rusqlite::types::Value;
use rusqlite::{Connection, Row, params, params_from_iter};

use crate::models::{
    CommandId, LedgerResult, LogEntry, LogQuery, NewLogEntry, PackageRef, PackageSnapshot,
};
use crate::sqlite::codec::{
    from_optional_unix_seconds, from_unix_seconds, parse_action, parse_reason, placeholders,
    to_i64, to_optional_unix_seconds, to_unix_seconds,
};

/// Appends one event. Log rows are never updated or deleted afterwards.
pub fn insert(connection: &Connection, entry: &NewLogEntry) -> LedgerResult<i64> {
    let snapshot = &entry.snapshot;
    connection.execute(
        "
INSERT INTO package_log (
    command_id, timestamp, action, name, manager, origin, version, reason,
    location, comment, install_ts, checksum, signature, license, size
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
",
        params![
            entry.command_id.map(|id| id.0),
            to_unix_seconds(entry.timestamp)?,
            entry.action.as_str(),
            snapshot.package.name,
            snapshot.package.manager,
            snapshot.origin,
            snapshot.version,
            snapshot.reason.map(|reason| reason.as_str()),
            snapshot.location,
            snapshot.comment,
            to_optional_unix_seconds(snapshot.installed_at)?,
            snapshot.checksum,
            snapshot.signature,
            snapshot.license,
            snapshot.size_bytes,
        ],
    )?;
    Ok(connection.last_insert_rowid())
}

/// Events newest first.
pub fn list(connection: &Connection, query: &LogQuery) -> LedgerResult<Vec<LogEntry>> {
    let mut clauses = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(name) = &query.name {
        values.push(Value::Text(name.clone()));
        clauses.push(format!("name = ?{}", values.len()));
    }
    if let Some(manager) = &query.manager {
        values.push(Value::Text(manager.clone()));
        clauses.push(format!("manager = ?{}", values.len()));
    }
    if let Some(command_id) = query.command_id {
        values.push(Value::Integer(command_id.0));
        clauses.push(format!("command_id = ?{}", values.len()));
    }
    if !query.actions.is_empty() {
        clauses.push(format!(
            "action IN ({})",
            placeholders(values.len() + 1, query.actions.len())
        ));
        values.extend(
            query
                .actions
                .iter()
                .map(|action| Value::Text(action.as_str().to_string())),
        );
    }

    let mut sql = String::from(
        "SELECT id, command_id, timestamp, action, name, manager, origin, version, reason, \
         location, comment, install_ts, checksum, signature, license, size FROM package_log",
    );
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY timestamp DESC, id DESC");
    if let Some(limit) = query.limit {
        values.push(Value::Integer(to_i64(limit)?));
        sql.push_str(&format!(" LIMIT ?{}", values.len()));
    }

    let mut statement = connection.prepare(&sql)?;
    let rows = statement.query_map(params_from_iter(values), entry_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LogEntry> {
    let action_raw: String = row.get(3)?;
    Ok(LogEntry {
        id: row.get(0)?,
        command_id: row.get::<_, Option<i64>>(1)?.map(CommandId),
        timestamp: from_unix_seconds(row.get(2)?)?,
        action: parse_action(&action_raw)?,
        snapshot: PackageSnapshot {
            package: PackageRef {
                name: row.get(4)?,
                manager: row.get(5)?,
            },
            origin: row.get(6)?,
            version: row.get(7)?,
            reason: parse_reason(row.get(8)?)?,
            location: row.get(9)?,
            comment: row.get(10)?,
            installed_at: from_optional_unix_seconds(row.get(11)?)?,
            checksum: row.get(12)?,
            signature: row.get(13)?,
            license: row.get(14)?,
            size_bytes: row.get(15)?,
        },
    })
}
