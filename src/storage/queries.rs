//! Database queries for tags, sessions and sync metadata

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

use crate::error::{Result, WorklogError};
use crate::types::*;

const LAST_SYNC_KEY: &str = "LastSync";

const TAG_COLUMNS: &str = "id, name, cloud_id, updated_at, is_deleted";

const SESSION_COLUMNS: &str = "id, session_date, time_hours, description, notes, \
     next_planned_stage, tag_id, tag_cloud_id, created_at, updated_at, cloud_id, is_deleted";

fn now() -> String {
    format_timestamp(&Utc::now())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Parse a tag from a database row
pub fn tag_from_row(row: &Row) -> rusqlite::Result<Tag> {
    let updated_at: String = row.get("updated_at")?;
    let is_deleted: i32 = row.get("is_deleted")?;

    Ok(Tag {
        id: row.get("id")?,
        name: row.get("name")?,
        cloud_id: row.get("cloud_id")?,
        updated_at: parse_timestamp(&updated_at),
        is_deleted: is_deleted != 0,
    })
}

/// Parse a session from a database row
pub fn session_from_row(row: &Row) -> rusqlite::Result<Session> {
    let session_date: String = row.get("session_date")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let is_deleted: i32 = row.get("is_deleted")?;

    let date = parse_date(&session_date).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("invalid session date: {}", session_date).into(),
        )
    })?;

    Ok(Session {
        id: row.get("id")?,
        date,
        hours: row.get("time_hours")?,
        description: row.get("description")?,
        notes: row.get("notes")?,
        next_stage: row.get("next_planned_stage")?,
        tag_id: row.get("tag_id")?,
        tag_cloud_id: row.get("tag_cloud_id")?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
        cloud_id: row.get("cloud_id")?,
        is_deleted: is_deleted != 0,
    })
}

fn validate_tag_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(WorklogError::InvalidInput(
            "Tag name cannot be empty".to_string(),
        ));
    }
    Ok(name.to_string())
}

fn validate_session(input: &NewSession) -> Result<()> {
    if !input.hours.is_finite() || input.hours <= 0.0 {
        return Err(WorklogError::InvalidInput(format!(
            "Hours must be a positive number, got {}",
            input.hours
        )));
    }
    if input.description.trim().is_empty() {
        return Err(WorklogError::InvalidInput(
            "Description cannot be empty".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// Tags
// ============================================================================

/// Create a tag.
///
/// Re-creating the name of a soft-deleted tag revives that row so the
/// unique-name constraint holds and the cloud id is preserved.
pub fn create_tag(conn: &Connection, name: &str) -> Result<Tag> {
    let name = validate_tag_name(name)?;

    let existing: Option<Tag> = conn
        .query_row(
            &format!("SELECT {} FROM tags WHERE name = ?", TAG_COLUMNS),
            params![name],
            tag_from_row,
        )
        .optional()?;

    match existing {
        Some(tag) if tag.is_deleted => {
            conn.execute(
                "UPDATE tags SET is_deleted = 0, updated_at = ? WHERE id = ?",
                params![now(), tag.id],
            )?;
            get_tag(conn, tag.id)
        }
        Some(_) => Err(WorklogError::InvalidInput(format!(
            "Tag '{}' already exists",
            name
        ))),
        None => {
            conn.execute(
                "INSERT INTO tags (name, updated_at, is_deleted) VALUES (?, ?, 0)",
                params![name, now()],
            )?;
            get_tag(conn, conn.last_insert_rowid())
        }
    }
}

/// Rename a tag
pub fn rename_tag(conn: &Connection, id: LocalId, name: &str) -> Result<Tag> {
    let name = validate_tag_name(name)?;
    let changed = conn.execute(
        "UPDATE tags SET name = ?, updated_at = ? WHERE id = ?",
        params![name, now(), id],
    )?;
    if changed == 0 {
        return Err(WorklogError::NotFound(id));
    }
    get_tag(conn, id)
}

/// Soft-delete a tag
pub fn delete_tag(conn: &Connection, id: LocalId) -> Result<()> {
    let changed = conn.execute(
        "UPDATE tags SET is_deleted = 1, updated_at = ? WHERE id = ? AND is_deleted = 0",
        params![now(), id],
    )?;
    if changed == 0 {
        return Err(WorklogError::NotFound(id));
    }
    Ok(())
}

/// Get a tag by id (deleted rows included)
pub fn get_tag(conn: &Connection, id: LocalId) -> Result<Tag> {
    conn.query_row(
        &format!("SELECT {} FROM tags WHERE id = ?", TAG_COLUMNS),
        params![id],
        tag_from_row,
    )
    .optional()?
    .ok_or(WorklogError::NotFound(id))
}

/// Live tags ordered by name
pub fn list_tags(conn: &Connection) -> Result<Vec<Tag>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM tags WHERE is_deleted = 0 ORDER BY name COLLATE NOCASE",
        TAG_COLUMNS
    ))?;
    let tags = stmt
        .query_map([], tag_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tags)
}

/// Full tag snapshot, deleted rows included
pub fn all_tags(conn: &Connection) -> Result<Vec<Tag>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM tags ORDER BY id", TAG_COLUMNS))?;
    let tags = stmt
        .query_map([], tag_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tags)
}

// ============================================================================
// Sessions
// ============================================================================

/// Create a session
pub fn create_session(conn: &Connection, input: &NewSession) -> Result<Session> {
    validate_session(input)?;
    let ts = now();

    conn.execute(
        "INSERT INTO work_sessions (session_date, time_hours, description, notes,
            next_planned_stage, tag_id, tag_cloud_id, created_at, updated_at, is_deleted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6,
            (SELECT cloud_id FROM tags WHERE id = ?6), ?7, ?7, 0)",
        params![
            input.date.format("%Y-%m-%d").to_string(),
            input.hours,
            input.description.trim(),
            non_empty(input.notes.as_deref()),
            non_empty(input.next_stage.as_deref()),
            input.tag_id,
            ts,
        ],
    )?;

    get_session(conn, conn.last_insert_rowid())
}

/// Update a session's editable fields
pub fn update_session(conn: &Connection, id: LocalId, input: &NewSession) -> Result<Session> {
    validate_session(input)?;

    let changed = conn.execute(
        "UPDATE work_sessions SET
            session_date = ?1, time_hours = ?2, description = ?3, notes = ?4,
            next_planned_stage = ?5, tag_id = ?6,
            tag_cloud_id = (SELECT cloud_id FROM tags WHERE id = ?6),
            updated_at = ?7
         WHERE id = ?8",
        params![
            input.date.format("%Y-%m-%d").to_string(),
            input.hours,
            input.description.trim(),
            non_empty(input.notes.as_deref()),
            non_empty(input.next_stage.as_deref()),
            input.tag_id,
            now(),
            id,
        ],
    )?;
    if changed == 0 {
        return Err(WorklogError::NotFound(id));
    }
    get_session(conn, id)
}

/// Soft-delete a session
pub fn delete_session(conn: &Connection, id: LocalId) -> Result<()> {
    let changed = conn.execute(
        "UPDATE work_sessions SET is_deleted = 1, updated_at = ? WHERE id = ? AND is_deleted = 0",
        params![now(), id],
    )?;
    if changed == 0 {
        return Err(WorklogError::NotFound(id));
    }
    Ok(())
}

/// Get a session by id (deleted rows included)
pub fn get_session(conn: &Connection, id: LocalId) -> Result<Session> {
    conn.query_row(
        &format!("SELECT {} FROM work_sessions WHERE id = ?", SESSION_COLUMNS),
        params![id],
        session_from_row,
    )
    .optional()?
    .ok_or(WorklogError::NotFound(id))
}

/// Live sessions for a day, oldest first
pub fn sessions_for_date(conn: &Connection, date: NaiveDate) -> Result<Vec<Session>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM work_sessions
         WHERE session_date = ? AND is_deleted = 0
         ORDER BY created_at ASC, id ASC",
        SESSION_COLUMNS
    ))?;
    let sessions = stmt
        .query_map(params![date.format("%Y-%m-%d").to_string()], session_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(sessions)
}

/// Full session snapshot, deleted rows included
pub fn all_sessions(conn: &Connection) -> Result<Vec<Session>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM work_sessions ORDER BY id",
        SESSION_COLUMNS
    ))?;
    let sessions = stmt
        .query_map([], session_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(sessions)
}

// ============================================================================
// Aggregates
// ============================================================================

fn collect_ints(conn: &Connection, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<i32>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(args, |row| {
            let raw: String = row.get(0)?;
            Ok(raw.parse::<i32>().unwrap_or_default())
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Years that have sessions, newest first
pub fn years(conn: &Connection) -> Result<Vec<i32>> {
    collect_ints(
        conn,
        "SELECT DISTINCT strftime('%Y', session_date) AS y FROM work_sessions
         WHERE is_deleted = 0 ORDER BY y DESC",
        &[],
    )
}

/// Months (1-12) of a year that have sessions
pub fn months_for_year(conn: &Connection, year: i32) -> Result<Vec<i32>> {
    collect_ints(
        conn,
        "SELECT DISTINCT strftime('%m', session_date) AS m FROM work_sessions
         WHERE is_deleted = 0 AND strftime('%Y', session_date) = ? ORDER BY m ASC",
        &[&format!("{:04}", year) as &dyn rusqlite::ToSql],
    )
}

/// Days of a month that have sessions
pub fn days_for_month(conn: &Connection, year: i32, month: u32) -> Result<Vec<NaiveDate>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT session_date FROM work_sessions
         WHERE is_deleted = 0 AND strftime('%Y', session_date) = ? AND strftime('%m', session_date) = ?
         ORDER BY session_date ASC",
    )?;
    let days = stmt
        .query_map(
            params![format!("{:04}", year), format!("{:02}", month)],
            |row| row.get::<_, String>(0),
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(days.iter().filter_map(|d| parse_date(d)).collect())
}

/// Total logged hours for a day
pub fn total_hours_for_date(conn: &Connection, date: NaiveDate) -> Result<f64> {
    let total = conn.query_row(
        "SELECT IFNULL(SUM(time_hours), 0) FROM work_sessions
         WHERE is_deleted = 0 AND session_date = ?",
        params![date.format("%Y-%m-%d").to_string()],
        |row| row.get(0),
    )?;
    Ok(total)
}

/// Total logged hours for a month
pub fn total_hours_for_month(conn: &Connection, year: i32, month: u32) -> Result<f64> {
    let total = conn.query_row(
        "SELECT IFNULL(SUM(time_hours), 0) FROM work_sessions
         WHERE is_deleted = 0 AND strftime('%Y', session_date) = ? AND strftime('%m', session_date) = ?",
        params![format!("{:04}", year), format!("{:02}", month)],
        |row| row.get(0),
    )?;
    Ok(total)
}

// ============================================================================
// Sync support
// ============================================================================

/// Attach a freshly minted cloud id to a tag that has none
pub fn assign_tag_cloud_id(conn: &Connection, id: LocalId, cloud_id: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE tags SET cloud_id = ? WHERE id = ? AND cloud_id IS NULL",
        params![cloud_id, id],
    )?;
    if changed == 0 {
        return Err(WorklogError::Internal(format!(
            "Tag {} already has a cloud id",
            id
        )));
    }
    Ok(())
}

/// Overwrite a tag with the remote copy
pub fn apply_remote_tag(conn: &Connection, id: LocalId, remote: &CloudTag) -> Result<()> {
    conn.execute(
        "UPDATE tags SET name = ?, updated_at = ?, is_deleted = ? WHERE id = ?",
        params![
            remote.name,
            format_timestamp(&remote.updated_at),
            remote.is_deleted as i32,
            id
        ],
    )?;
    Ok(())
}

/// Insert a tag that only exists remotely
pub fn insert_remote_tag(conn: &Connection, remote: &CloudTag) -> Result<LocalId> {
    conn.execute(
        "INSERT INTO tags (name, cloud_id, updated_at, is_deleted) VALUES (?, ?, ?, ?)",
        params![
            remote.name,
            remote.cloud_id,
            format_timestamp(&remote.updated_at),
            remote.is_deleted as i32
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Find a tag by exact name, including soft-deleted rows
pub fn tag_by_name(conn: &Connection, name: &str) -> Result<Option<Tag>> {
    let tag = conn
        .query_row(
            &format!("SELECT {} FROM tags WHERE name = ?", TAG_COLUMNS),
            params![name],
            tag_from_row,
        )
        .optional()?;
    Ok(tag)
}

/// Attach a freshly minted cloud id to a session that has none
pub fn assign_session_cloud_id(conn: &Connection, id: LocalId, cloud_id: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE work_sessions SET cloud_id = ? WHERE id = ? AND cloud_id IS NULL",
        params![cloud_id, id],
    )?;
    if changed == 0 {
        return Err(WorklogError::Internal(format!(
            "Session {} already has a cloud id",
            id
        )));
    }
    Ok(())
}

/// Overwrite a session with the remote copy; `tag_id` is the local row the
/// remote `tag_cloud_id` resolved to
pub fn apply_remote_session(
    conn: &Connection,
    id: LocalId,
    remote: &CloudSession,
    tag_id: Option<LocalId>,
) -> Result<()> {
    conn.execute(
        "UPDATE work_sessions SET
            session_date = ?, time_hours = ?, description = ?, notes = ?,
            next_planned_stage = ?, tag_id = ?, tag_cloud_id = ?,
            updated_at = ?, is_deleted = ?
         WHERE id = ?",
        params![
            remote.date.format("%Y-%m-%d").to_string(),
            remote.hours,
            remote.description,
            remote.notes,
            remote.next_stage,
            tag_id,
            remote.tag_cloud_id,
            format_timestamp(&remote.updated_at),
            remote.is_deleted as i32,
            id
        ],
    )?;
    Ok(())
}

/// Insert a session that only exists remotely
pub fn insert_remote_session(
    conn: &Connection,
    remote: &CloudSession,
    tag_id: Option<LocalId>,
) -> Result<LocalId> {
    conn.execute(
        "INSERT INTO work_sessions (session_date, time_hours, description, notes,
            next_planned_stage, tag_id, tag_cloud_id, created_at, updated_at, cloud_id, is_deleted)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            remote.date.format("%Y-%m-%d").to_string(),
            remote.hours,
            remote.description,
            remote.notes,
            remote.next_stage,
            tag_id,
            remote.tag_cloud_id,
            format_timestamp(&remote.created_at),
            format_timestamp(&remote.updated_at),
            remote.cloud_id,
            remote.is_deleted as i32
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Recompute every tagged session's `tag_cloud_id` from its tag row
pub fn refresh_session_tag_cloud_ids(conn: &Connection) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE work_sessions SET tag_cloud_id = (
            SELECT cloud_id FROM tags WHERE tags.id = work_sessions.tag_id
         ) WHERE tag_id IS NOT NULL",
        [],
    )?;
    Ok(changed)
}

/// Link untagged sessions whose `tag_cloud_id` now matches a local tag
pub fn relink_orphaned_sessions(conn: &Connection) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE work_sessions SET tag_id = (
            SELECT id FROM tags WHERE tags.cloud_id = work_sessions.tag_cloud_id
         ) WHERE tag_id IS NULL
           AND tag_cloud_id IS NOT NULL
           AND EXISTS (SELECT 1 FROM tags WHERE tags.cloud_id = work_sessions.tag_cloud_id)",
        [],
    )?;
    Ok(changed)
}

/// Lookup from tag cloud id to local tag id
pub fn tag_ids_by_cloud_id(conn: &Connection) -> Result<HashMap<String, LocalId>> {
    let mut stmt = conn.prepare("SELECT id, cloud_id FROM tags WHERE cloud_id IS NOT NULL")?;
    let map = stmt
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, LocalId>(0)?)))?
        .collect::<rusqlite::Result<HashMap<_, _>>>()?;
    Ok(map)
}

/// Timestamp of the last completed sync
pub fn last_sync(conn: &Connection) -> Result<Option<DateTime<Utc>>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM sync_metadata WHERE key = ?",
            params![LAST_SYNC_KEY],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.map(|v| parse_timestamp(&v)))
}

/// Record the last completed sync
pub fn set_last_sync(conn: &Connection, ts: &DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO sync_metadata (key, value) VALUES (?, ?)",
        params![LAST_SYNC_KEY, format_timestamp(ts)],
    )?;
    Ok(())
}
