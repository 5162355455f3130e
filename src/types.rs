//! Core types for WorkLog

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Local row identifier
pub type LocalId = i64;

/// A tag for categorizing work sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: LocalId,
    pub name: String,
    /// UUID shared with the remote table (None until first sync)
    pub cloud_id: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

/// A work session entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: LocalId,
    pub date: NaiveDate,
    pub hours: f64,
    pub description: String,
    pub notes: Option<String>,
    pub next_stage: Option<String>,
    pub tag_id: Option<LocalId>,
    /// Mirrors the referenced tag's cloud id
    pub tag_cloud_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cloud_id: Option<String>,
    pub is_deleted: bool,
}

/// Input for creating or updating a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    pub date: NaiveDate,
    pub hours: f64,
    pub description: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub next_stage: Option<String>,
    #[serde(default)]
    pub tag_id: Option<LocalId>,
}

impl NewSession {
    pub fn new(date: NaiveDate, hours: f64, description: impl Into<String>) -> Self {
        Self {
            date,
            hours,
            description: description.into(),
            notes: None,
            next_stage: None,
            tag_id: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_next_stage(mut self, next_stage: impl Into<String>) -> Self {
        self.next_stage = Some(next_stage.into());
        self
    }

    pub fn with_tag(mut self, tag_id: LocalId) -> Self {
        self.tag_id = Some(tag_id);
        self
    }
}

/// A tag as stored in the remote table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudTag {
    pub cloud_id: String,
    pub name: String,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

/// A session as stored in the remote table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudSession {
    pub cloud_id: String,
    pub date: NaiveDate,
    pub hours: f64,
    pub description: String,
    pub notes: Option<String>,
    pub next_stage: Option<String>,
    pub tag_cloud_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

/// The two record collections that take part in sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Tags,
    Sessions,
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Collection::Tags => write!(f, "tags"),
            Collection::Sessions => write!(f, "sessions"),
        }
    }
}

/// Phase of a sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Downloading,
    Merging(Collection),
    Uploading,
    Finalizing,
}

/// Outcome of a sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    /// Last transport error seen during the pass
    pub error_message: Option<String>,
    pub sessions_uploaded: u32,
    pub sessions_downloaded: u32,
    pub tags_uploaded: u32,
    pub tags_downloaded: u32,
}

impl SyncResult {
    /// Human-readable summary
    pub fn message(&self) -> String {
        if self.success {
            format!(
                "Sync completed! Uploaded: {} sessions, {} tags. Downloaded: {} sessions, {} tags.",
                self.sessions_uploaded,
                self.tags_uploaded,
                self.sessions_downloaded,
                self.tags_downloaded
            )
        } else {
            format!(
                "Sync failed: {}",
                self.error_message.as_deref().unwrap_or("unknown error")
            )
        }
    }

    pub fn uploaded(&self, collection: Collection) -> u32 {
        match collection {
            Collection::Tags => self.tags_uploaded,
            Collection::Sessions => self.sessions_uploaded,
        }
    }

    pub fn downloaded(&self, collection: Collection) -> u32 {
        match collection {
            Collection::Tags => self.tags_downloaded,
            Collection::Sessions => self.sessions_downloaded,
        }
    }

    pub(crate) fn record_upload(&mut self, collection: Collection) {
        match collection {
            Collection::Tags => self.tags_uploaded += 1,
            Collection::Sessions => self.sessions_uploaded += 1,
        }
    }

    pub(crate) fn record_download(&mut self, collection: Collection) {
        match collection {
            Collection::Tags => self.tags_downloaded += 1,
            Collection::Sessions => self.sessions_downloaded += 1,
        }
    }
}

/// Sync status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub is_configured: bool,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Notification emitted by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Started,
    PhaseChanged(SyncPhase),
    Completed(SyncResult),
    /// Local rows were written; views should reload
    DataChanged,
}

/// Format a timestamp for storage and the wire.
///
/// Keeps sub-second precision so a value read back compares equal to the
/// one written.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse a stored or remote timestamp.
///
/// Accepts RFC 3339 as well as the naive `YYYY-MM-DD HH:MM:SS` form SQLite's
/// `datetime('now')` produces (read as UTC). Anything else maps to the Unix
/// epoch so a malformed remote value never wins a comparison.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return naive.and_utc();
        }
    }
    DateTime::<Utc>::UNIX_EPOCH
}

/// Parse a `YYYY-MM-DD` session date
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    // Some writers emit a full timestamp for the date column
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}
