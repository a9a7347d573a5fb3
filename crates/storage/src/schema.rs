use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS pages (
    page_id TEXT PRIMARY KEY,
    parent_id TEXT,
    title TEXT NOT NULL,
    slug TEXT NOT NULL,
    layout TEXT,
    theme TEXT,
    hostname TEXT,
    can_override INTEGER NOT NULL DEFAULT 1,
    template_origin TEXT
);
CREATE INDEX IF NOT EXISTS idx_pages_parent ON pages (parent_id);

CREATE TABLE IF NOT EXISTS objects (
    object_id TEXT PRIMARY KEY,
    strict_type INTEGER NOT NULL DEFAULT 0,
    control_type TEXT
);

CREATE TABLE IF NOT EXISTS records (
    domain TEXT NOT NULL CHECK (domain IN ('page', 'object')),
    entity_id TEXT NOT NULL,
    version_id TEXT NOT NULL,
    widgets TEXT NOT NULL,
    fields TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (domain, entity_id, version_id)
);
";
