use rusqlite::Connection;

use crate::models::{LedgerError, LedgerErrorKind, LedgerResult};

/// Full consistency scan: page-level integrity plus foreign-key violations.
/// Returns `"ok"` for a healthy database. Nothing is ever repaired here.
pub fn check(connection: &Connection) -> LedgerResult<String> {
    let mut statement = connection.prepare("PRAGMA integrity_check")?;
    let mut problems = statement
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    problems.retain(|line| line != "ok");

    let mut statement = connection.prepare("PRAGMA foreign_key_check")?;
    let violations = statement
        .query_map([], |row| {
            let table: String = row.get(0)?;
            let rowid: Option<i64> = row.get(1)?;
            let parent: String = row.get(2)?;
            Ok(format!(
                "row {} in '{table}' references a missing '{parent}' row",
                rowid.map(|id| id.to_string()).unwrap_or_else(|| "?".to_string())
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    problems.extend(violations);

    if problems.is_empty() {
        return Ok("ok".to_string());
    }

    tracing::warn!(problems = problems.len(), "ledger integrity check reported problems");
    Err(LedgerError::new(
        LedgerErrorKind::IntegrityCheckFailed,
        problems.join("; "),
    ))
}
