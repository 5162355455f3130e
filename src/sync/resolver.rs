//! Last-write-wins conflict resolution
//!
//! Pure per-record decisions. The orchestrator pairs each local record with
//! the remote item carrying the same cloud id and acts on the outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CloudSession, CloudTag, Session, Tag};

/// What to do with a local record after comparing it to its remote match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Both sides carry the same timestamp
    NoOp,
    /// Remote is newer; overwrite the local row
    ApplyRemote,
    /// Local is newer, or the remote copy is missing
    Upload,
    /// Never synced; mint a cloud id, then upload
    AssignAndUpload,
}

impl Decision {
    pub fn uploads(&self) -> bool {
        matches!(self, Decision::Upload | Decision::AssignAndUpload)
    }
}

/// What to do with a remote item no local record points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteOnly {
    Insert,
    Skip,
}

/// A locally stored record that takes part in sync
pub trait LocalRecord {
    fn cloud_id(&self) -> Option<&str>;
    fn updated_at(&self) -> DateTime<Utc>;
}

/// A record decoded from the remote table
pub trait RemoteRecord {
    fn cloud_id(&self) -> &str;
    fn updated_at(&self) -> DateTime<Utc>;
    fn is_deleted(&self) -> bool;
}

impl LocalRecord for Tag {
    fn cloud_id(&self) -> Option<&str> {
        self.cloud_id.as_deref()
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl LocalRecord for Session {
    fn cloud_id(&self) -> Option<&str> {
        self.cloud_id.as_deref()
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl RemoteRecord for CloudTag {
    fn cloud_id(&self) -> &str {
        &self.cloud_id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }
}

impl RemoteRecord for CloudSession {
    fn cloud_id(&self) -> &str {
        &self.cloud_id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }
}

/// Decide between a local record and its remote match, if any
pub fn resolve<L, R>(local: &L, remote: Option<&R>) -> Decision
where
    L: LocalRecord + ?Sized,
    R: RemoteRecord + ?Sized,
{
    if local.cloud_id().is_none() {
        return Decision::AssignAndUpload;
    }

    match remote {
        None => Decision::Upload,
        Some(remote) => match remote.updated_at().cmp(&local.updated_at()) {
            std::cmp::Ordering::Greater => Decision::ApplyRemote,
            std::cmp::Ordering::Less => Decision::Upload,
            std::cmp::Ordering::Equal => Decision::NoOp,
        },
    }
}

/// Decide what to do with a remote item that has no local counterpart
pub fn resolve_remote_only<R: RemoteRecord + ?Sized>(remote: &R) -> RemoteOnly {
    if remote.is_deleted() {
        RemoteOnly::Skip
    } else {
        RemoteOnly::Insert
    }
}
