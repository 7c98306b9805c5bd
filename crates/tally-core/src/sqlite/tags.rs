use std::collections::BTreeMap;
use std::time::SystemTime;

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::models::{LedgerError, LedgerResult, PackageRef, Tag, TagId, normalize_tag};
use crate::sqlite::codec::placeholders;
use crate::sqlite::packages;

/// Case-insensitive lookup that creates the tag when it does not exist yet.
/// A concurrent identical insert lands on the unique index and is read back.
pub fn find_or_create(connection: &Connection, raw_name: &str) -> LedgerResult<TagId> {
    let name = normalize_tag(raw_name)
        .ok_or_else(|| LedgerError::invalid_input("tag name must not be empty"))?;

    connection.execute(
        "INSERT INTO tags (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
        [name.as_str()],
    )?;

    find(connection, &name)?.ok_or_else(|| {
        LedgerError::internal(format!("tag '{name}' vanished right after being created"))
    })
}

pub fn find(connection: &Connection, raw_name: &str) -> LedgerResult<Option<TagId>> {
    let Some(name) = normalize_tag(raw_name) else {
        return Ok(None);
    };
    let id = connection
        .query_row("SELECT id FROM tags WHERE name = ?1", [name], |row| {
            row.get::<_, i64>(0)
        })
        .optional()?;
    Ok(id.map(TagId))
}

/// Associates a tag with a package. Adding an existing association is a
/// no-op; the package's last-updated time is refreshed either way.
/// Returns whether a new association was created.
pub fn add_to_package(
    connection: &Connection,
    package: &PackageRef,
    tag: TagId,
    now: SystemTime,
) -> LedgerResult<bool> {
    let inserted = connection.execute(
        "INSERT OR IGNORE INTO package_tags (name, manager, tag_id) VALUES (?1, ?2, ?3)",
        params![package.name, package.manager, tag.0],
    )?;
    packages::touch(connection, package, now)?;
    Ok(inserted > 0)
}

/// Removes an association. Removing a missing one is a no-op; the tag
/// itself is never deleted here.
pub fn remove_from_package(
    connection: &Connection,
    package: &PackageRef,
    tag: TagId,
    now: SystemTime,
) -> LedgerResult<bool> {
    let deleted = connection.execute(
        "DELETE FROM package_tags WHERE name = ?1 AND manager = ?2 AND tag_id = ?3",
        params![package.name, package.manager, tag.0],
    )?;
    packages::touch(connection, package, now)?;
    Ok(deleted > 0)
}

pub fn for_package(connection: &Connection, package: &PackageRef) -> LedgerResult<Vec<String>> {
    let mut statement = connection.prepare(
        "
SELECT t.name
FROM package_tags pt
JOIN tags t ON t.id = pt.tag_id
WHERE pt.name = ?1 AND pt.manager = ?2
ORDER BY t.name
",
    )?;
    let rows = statement.query_map(params![package.name, package.manager], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
}

/// Tag sets for many packages at once. Packages without tags are absent.
pub fn for_packages(
    connection: &Connection,
    packages: &[PackageRef],
) -> LedgerResult<BTreeMap<PackageRef, Vec<String>>> {
    let mut tag_sets: BTreeMap<PackageRef, Vec<String>> = BTreeMap::new();
    if packages.is_empty() {
        return Ok(tag_sets);
    }

    let managers = {
        let mut managers = packages
            .iter()
            .map(|package| package.manager.clone())
            .collect::<Vec<_>>();
        managers.sort();
        managers.dedup();
        managers
    };

    let mut statement = connection.prepare(&format!(
        "
SELECT pt.manager, pt.name, t.name
FROM package_tags pt
JOIN tags t ON t.id = pt.tag_id
WHERE pt.manager IN ({})
ORDER BY pt.manager, pt.name, t.name
",
        placeholders(1, managers.len())
    ))?;
    let rows = statement.query_map(params_from_iter(managers.iter()), |row| {
        Ok((
            PackageRef {
                manager: row.get(0)?,
                name: row.get(1)?,
            },
            row.get::<_, String>(2)?,
        ))
    })?;

    let wanted = packages.iter().collect::<std::collections::BTreeSet<_>>();
    for row in rows {
        let (package, tag) = row?;
        if wanted.contains(&package) {
            tag_sets.entry(package).or_default().push(tag);
        }
    }
    Ok(tag_sets)
}

pub fn list_with_counts(connection: &Connection) -> LedgerResult<Vec<Tag>> {
    let mut statement = connection.prepare(
        "
SELECT t.id, t.name, COUNT(pt.tag_id)
FROM tags t
LEFT JOIN package_tags pt ON pt.tag_id = t.id
GROUP BY t.id, t.name
ORDER BY t.name
",
    )?;
    let rows = statement.query_map([], |row| {
        let count: i64 = row.get(2)?;
        Ok(Tag {
            id: TagId(row.get(0)?),
            name: row.get(1)?,
            package_count: usize::try_from(count).unwrap_or_default(),
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Deletes a tag and, through the cascade, all of its associations.
pub fn delete(connection: &Connection, raw_name: &str) -> LedgerResult<bool> {
    let Some(tag) = find(connection, raw_name)? else {
        return Ok(false);
    };
    let deleted = connection.execute("DELETE FROM tags WHERE id = ?1", [tag.0])?;
    Ok(deleted > 0)
}
