#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "initial_ledger_schema",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS command_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    start_ts INTEGER NOT NULL,
    end_ts INTEGER,
    version TEXT NOT NULL,
    command_string TEXT NOT NULL,
    pm_command_string TEXT,
    exit_code INTEGER,
    error_message TEXT,
    details TEXT
);

CREATE TABLE IF NOT EXISTS current_packages (
    name TEXT NOT NULL,
    manager TEXT NOT NULL,
    origin TEXT,
    version TEXT,
    reason TEXT CHECK (reason IS NULL OR reason IN ('user', 'dependency', 'discovered')),
    location TEXT,
    comment TEXT,
    install_ts INTEGER,
    last_updated_ts INTEGER NOT NULL,
    checksum TEXT,
    signature TEXT,
    license TEXT,
    size INTEGER,
    PRIMARY KEY (name, manager)
);

CREATE TABLE IF NOT EXISTS package_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    command_id INTEGER REFERENCES command_history(id) ON DELETE SET NULL,
    timestamp INTEGER NOT NULL,
    action TEXT NOT NULL CHECK (action IN (
        'installed', 'removed', 'comment_changed', 'tags_updated', 'manual_add',
        'manual_remove_log', 'sync_add', 'sync_remove', 'sync_update', 'init'
    )),
    name TEXT NOT NULL,
    manager TEXT NOT NULL,
    origin TEXT,
    version TEXT,
    reason TEXT,
    location TEXT,
    comment TEXT,
    install_ts INTEGER,
    checksum TEXT,
    signature TEXT,
    license TEXT,
    size INTEGER
);
"#,
    down_sql: r#"
DROP TABLE IF EXISTS package_log;
DROP TABLE IF EXISTS current_packages;
DROP TABLE IF EXISTS command_history;
"#,
};

const MIGRATION_0002: SqliteMigration = SqliteMigration {
    version: 2,
    name: "add_tags",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE
);

CREATE TABLE IF NOT EXISTS package_tags (
    name TEXT NOT NULL,
    manager TEXT NOT NULL,
    tag_id INTEGER NOT NULL,
    PRIMARY KEY (name, manager, tag_id),
    FOREIGN KEY (name, manager) REFERENCES current_packages(name, manager) ON DELETE CASCADE,
    FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_package_tags_tag ON package_tags (tag_id);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_package_tags_tag;
DROP TABLE IF EXISTS package_tags;
DROP TABLE IF EXISTS tags;
"#,
};

const MIGRATION_0003: SqliteMigration = SqliteMigration {
    version: 3,
    name: "add_lookup_indexes",
    up_sql: r#"
CREATE INDEX IF NOT EXISTS idx_package_log_package
    ON package_log (manager, name, timestamp DESC);

CREATE INDEX IF NOT EXISTS idx_package_log_command
    ON package_log (command_id);

CREATE INDEX IF NOT EXISTS idx_current_packages_updated
    ON current_packages (last_updated_ts);

CREATE INDEX IF NOT EXISTS idx_command_history_open
    ON command_history (end_ts)
    WHERE end_ts IS NULL;
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_command_history_open;
DROP INDEX IF EXISTS idx_current_packages_updated;
DROP INDEX IF EXISTS idx_package_log_command;
DROP INDEX IF EXISTS idx_package_log_package;
"#,
};

const MIGRATIONS: [SqliteMigration; 3] = [MIGRATION_0001, MIGRATION_0002, MIGRATION_0003];

pub fn migrations() -> &'static [SqliteMigration] {
    &MIGRATIONS
}

pub fn migration(version: i64) -> Option<&'static SqliteMigration> {
    MIGRATIONS.iter().find(|entry| entry.version == version)
}

pub fn current_schema_version() -> i64 {
    MIGRATIONS.last().map(|entry| entry.version).unwrap_or(0)
}
