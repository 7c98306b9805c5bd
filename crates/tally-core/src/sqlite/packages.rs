//! `current_packages` access. Every function runs on whatever connection or
//! transaction the caller hands in.

use std::collections::BTreeMap;
use std::time::SystemTime;

use rusqlite::types::Value;
use rusqlite::{Connection, Row, params, params_from_iter};

use crate::models::{
    CurrentPackage, LedgerError, LedgerErrorKind, LedgerResult, PackageFilter, PackageRef,
    normalize_tag,
};
use crate::sqlite::codec::{
    from_optional_unix_seconds, from_unix_seconds, parse_reason, placeholders,
    to_optional_unix_seconds, to_unix_seconds,
};

const PACKAGE_COLUMNS: &str = "cp.name, cp.manager, cp.origin, cp.version, cp.reason, cp.location, \
     cp.comment, cp.install_ts, cp.last_updated_ts, cp.checksum, cp.signature, cp.license, cp.size";

/// Point lookup by exact key.
pub fn get(connection: &Connection, package: &PackageRef) -> LedgerResult<Option<CurrentPackage>> {
    let mut statement = connection.prepare(&format!(
        "SELECT {PACKAGE_COLUMNS} FROM current_packages cp WHERE cp.name = ?1 AND cp.manager = ?2"
    ))?;
    let mut rows = statement.query(params![package.name, package.manager])?;
    match rows.next()? {
        Some(row) => Ok(Some(package_from_row(row)?)),
        None => Ok(None),
    }
}

/// Point lookup by name with an optional manager qualifier.
///
/// Without a manager the name must resolve to exactly one tracked package;
/// a name tracked by several managers is reported as `Ambiguous`.
pub fn find(
    connection: &Connection,
    name: &str,
    manager: Option<&str>,
) -> LedgerResult<CurrentPackage> {
    if let Some(manager) = manager {
        return get(connection, &PackageRef::new(manager, name))?.ok_or_else(|| {
            LedgerError::not_found(format!("package '{name}' is not tracked for manager '{manager}'"))
                .with_manager(manager)
        });
    }

    let mut statement = connection.prepare(&format!(
        "SELECT {PACKAGE_COLUMNS} FROM current_packages cp WHERE cp.name = ?1 ORDER BY cp.manager"
    ))?;
    let mut matches = statement
        .query_map([name], package_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    match matches.len() {
        0 => Err(LedgerError::not_found(format!(
            "package '{name}' is not tracked"
        ))),
        1 => Ok(matches.remove(0)),
        _ => {
            let managers = matches
                .iter()
                .map(|package| package.package.manager.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            Err(LedgerError::new(
                LedgerErrorKind::Ambiguous,
                format!("package '{name}' is tracked by several managers ({managers}); specify one"),
            ))
        }
    }
}

pub fn list(connection: &Connection, filter: &PackageFilter) -> LedgerResult<Vec<CurrentPackage>> {
    let (sql, values) = filtered_select(filter)?;
    let mut statement = connection.prepare(&sql)?;
    let rows = statement.query_map(params_from_iter(values), package_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// All rows for the given managers keyed by package identity.
pub fn snapshot_for_managers(
    connection: &Connection,
    managers: &[String],
) -> LedgerResult<BTreeMap<PackageRef, CurrentPackage>> {
    if managers.is_empty() {
        return Ok(BTreeMap::new());
    }
    let filter = PackageFilter::managers(managers.iter().cloned());
    Ok(list(connection, &filter)?
        .into_iter()
        .map(|package| (package.package.clone(), package))
        .collect())
}

/// Inserts the row or replaces every column of the existing one. Uses an
/// upsert rather than `INSERT OR REPLACE` so tag associations survive.
pub fn upsert(connection: &Connection, package: &CurrentPackage) -> LedgerResult<()> {
    connection.execute(
        "
INSERT INTO current_packages (
    name, manager, origin, version, reason, location, comment,
    install_ts, last_updated_ts, checksum, signature, license, size
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
ON CONFLICT(name, manager) DO UPDATE SET
    origin = excluded.origin,
    version = excluded.version,
    reason = excluded.reason,
    location = excluded.location,
    comment = excluded.comment,
    install_ts = excluded.install_ts,
    last_updated_ts = excluded.last_updated_ts,
    checksum = excluded.checksum,
    signature = excluded.signature,
    license = excluded.license,
    size = excluded.size
",
        params![
            package.package.name,
            package.package.manager,
            package.origin,
            package.version,
            package.reason.map(|reason| reason.as_str()),
            package.location,
            package.comment,
            to_optional_unix_seconds(package.installed_at)?,
            to_unix_seconds(package.last_updated)?,
            package.checksum,
            package.signature,
            package.license,
            package.size_bytes,
        ],
    )?;
    Ok(())
}

/// Deletes the row; tag associations go with it. Returns whether a row existed.
pub fn delete(connection: &Connection, package: &PackageRef) -> LedgerResult<bool> {
    let deleted = connection.execute(
        "DELETE FROM current_packages WHERE name = ?1 AND manager = ?2",
        params![package.name, package.manager],
    )?;
    Ok(deleted > 0)
}

pub fn clear_managers(connection: &Connection, managers: &[String]) -> LedgerResult<usize> {
    if managers.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "DELETE FROM current_packages WHERE manager IN ({})",
        placeholders(1, managers.len())
    );
    Ok(connection.execute(&sql, params_from_iter(managers.iter()))?)
}

pub fn touch(connection: &Connection, package: &PackageRef, now: SystemTime) -> LedgerResult<()> {
    connection.execute(
        "UPDATE current_packages SET last_updated_ts = ?3 WHERE name = ?1 AND manager = ?2",
        params![package.name, package.manager, to_unix_seconds(now)?],
    )?;
    Ok(())
}

pub fn set_comment(
    connection: &Connection,
    package: &PackageRef,
    comment: Option<&str>,
    now: SystemTime,
) -> LedgerResult<bool> {
    let updated = connection.execute(
        "
UPDATE current_packages
SET comment = ?3, last_updated_ts = ?4
WHERE name = ?1 AND manager = ?2
",
        params![package.name, package.manager, comment, to_unix_seconds(now)?],
    )?;
    Ok(updated > 0)
}

pub fn count_by_manager(connection: &Connection) -> LedgerResult<Vec<(String, usize)>> {
    let mut statement = connection.prepare(
        "SELECT manager, COUNT(*) FROM current_packages GROUP BY manager ORDER BY manager",
    )?;
    let rows = statement.query_map([], |row| {
        let manager: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        Ok((manager, usize::try_from(count).unwrap_or_default()))
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn filtered_select(filter: &PackageFilter) -> LedgerResult<(String, Vec<Value>)> {
    let mut clauses = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    let mut push_in = |column: &str, items: Vec<String>, values: &mut Vec<Value>| {
        let sql = format!("{column} IN ({})", placeholders(values.len() + 1, items.len()));
        values.extend(items.into_iter().map(Value::Text));
        clauses.push(sql);
    };

    if !filter.reasons.is_empty() {
        let reasons = filter
            .reasons
            .iter()
            .map(|reason| reason.as_str().to_string())
            .collect();
        push_in("cp.reason", reasons, &mut values);
    }
    if !filter.managers.is_empty() {
        push_in("cp.manager", filter.managers.clone(), &mut values);
    }
    if !filter.origins.is_empty() {
        push_in("cp.origin", filter.origins.clone(), &mut values);
    }
    if !filter.names.is_empty() {
        push_in("cp.name", filter.names.clone(), &mut values);
    }

    let mut tags = filter
        .tags
        .iter()
        .filter_map(|tag| normalize_tag(tag))
        .collect::<Vec<_>>();
    tags.sort();
    tags.dedup();
    if !tags.is_empty() {
        let first = values.len() + 1;
        let tag_count = tags.len();
        values.extend(tags.into_iter().map(Value::Text));
        values.push(Value::Integer(i64::try_from(tag_count).map_err(|_| {
            LedgerError::invalid_input("too many tags in filter")
        })?));
        clauses.push(format!(
            "(
    SELECT COUNT(DISTINCT t.id)
    FROM package_tags pt
    JOIN tags t ON t.id = pt.tag_id
    WHERE pt.name = cp.name AND pt.manager = cp.manager
      AND t.name IN ({})
) = ?{}",
            placeholders(first, tag_count),
            first + tag_count
        ));
    }

    if let Some(since) = filter.since {
        values.push(Value::Integer(to_unix_seconds(since)?));
        clauses.push(format!("cp.last_updated_ts >= ?{}", values.len()));
    }
    if let Some(before) = filter.before {
        values.push(Value::Integer(to_unix_seconds(before)?));
        clauses.push(format!("cp.last_updated_ts < ?{}", values.len()));
    }

    let mut sql = format!("SELECT {PACKAGE_COLUMNS} FROM current_packages cp");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY cp.name, cp.manager");
    Ok((sql, values))
}

fn package_from_row(row: &Row<'_>) -> rusqlite::Result<CurrentPackage> {
    Ok(CurrentPackage {
        package: PackageRef {
            name: row.get(0)?,
            manager: row.get(1)?,
        },
        origin: row.get(2)?,
        version: row.get(3)?,
        reason: parse_reason(row.get(4)?)?,
        location: row.get(5)?,
        comment: row.get(6)?,
        installed_at: from_optional_unix_seconds(row.get(7)?)?,
        last_updated: from_unix_seconds(row.get(8)?)?,
        checksum: row.get(9)?,
        signature: row.get(10)?,
        license: row.get(11)?,
        size_bytes: row.get(12)?,
    })
}
