//! Database migrations for WorkLog

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < SCHEMA_VERSION {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Initial schema (v1): tags and sessions
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS work_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_date TEXT NOT NULL,
            time_hours REAL NOT NULL,
            description TEXT NOT NULL,
            notes TEXT,
            next_planned_stage TEXT,
            tag_id INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE SET NULL
        );

        CREATE INDEX IF NOT EXISTS idx_work_sessions_date ON work_sessions(session_date);

        INSERT INTO schema_version (version) VALUES (1);
        "#,
    )?;
    Ok(())
}

/// Cloud sync support (v2): cloud ids, soft deletes, sync metadata
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        ALTER TABLE tags ADD COLUMN cloud_id TEXT;
        ALTER TABLE tags ADD COLUMN is_deleted INTEGER NOT NULL DEFAULT 0;

        ALTER TABLE work_sessions ADD COLUMN cloud_id TEXT;
        ALTER TABLE work_sessions ADD COLUMN tag_cloud_id TEXT;
        ALTER TABLE work_sessions ADD COLUMN is_deleted INTEGER NOT NULL DEFAULT 0;

        CREATE UNIQUE INDEX IF NOT EXISTS idx_tags_cloud_id ON tags(cloud_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_work_sessions_cloud_id ON work_sessions(cloud_id);

        CREATE TABLE IF NOT EXISTS sync_metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (2);
        "#,
    )?;
    Ok(())
}
