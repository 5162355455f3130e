//! End-to-end sync tests against an in-process remote table
//!
//! Run with: cargo test --test sync_engine

use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;

use worklog::storage::queries;
use worklog::sync::items::{AttributeValue, Item};
use worklog::sync::{InMemoryTable, Operation, SyncConfig, SyncOrchestrator};
use worklog::types::{Collection, NewSession, SyncEvent, SyncPhase};
use worklog::{Storage, WorklogError};

const PROFILE: &str = "profile-1";
const TAGS: &str = "WorkLog_Tags";
const SESSIONS: &str = "WorkLog_Sessions";

fn config() -> SyncConfig {
    SyncConfig::new("AKIDEXAMPLE", "secret", "us-east-1", PROFILE)
}

fn client(remote: &Arc<InMemoryTable>) -> SyncOrchestrator {
    SyncOrchestrator::new(Storage::open_in_memory().unwrap(), remote.clone(), config())
}

fn item(value: serde_json::Value) -> Item {
    serde_json::from_value(value).unwrap()
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn s(item: &Item, key: &str) -> Option<String> {
    item.get(key).and_then(AttributeValue::as_s).map(str::to_string)
}

fn add_tag(sync: &SyncOrchestrator, name: &str) -> i64 {
    sync.storage()
        .with_connection(|conn| queries::create_tag(conn, name))
        .unwrap()
        .id
}

fn add_session(sync: &SyncOrchestrator, input: NewSession) -> i64 {
    sync.storage()
        .with_connection(|conn| queries::create_session(conn, &input))
        .unwrap()
        .id
}

#[tokio::test]
async fn test_new_tag_gets_cloud_id_and_reaches_other_clients() {
    let remote = Arc::new(InMemoryTable::new());
    let a = client(&remote);
    let id = add_tag(&a, "Build");

    let result = a.sync().await.unwrap();
    assert!(result.success);
    assert_eq!(result.tags_uploaded, 1);
    assert_eq!(remote.calls(Operation::PutItem), 1);

    let tag = a
        .storage()
        .with_connection(|conn| queries::get_tag(conn, id))
        .unwrap();
    let cloud_id = tag.cloud_id.clone().unwrap();
    assert!(!cloud_id.is_empty());

    let stored = remote.get(TAGS, PROFILE, &cloud_id).unwrap();
    assert_eq!(s(&stored, "Name").as_deref(), Some("Build"));

    // A second client sees it under the same cloud id
    let b = client(&remote);
    let result = b.sync().await.unwrap();
    assert_eq!(result.tags_downloaded, 1);
    let tags = b.storage().with_connection(queries::list_tags).unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].name, "Build");
    assert_eq!(tags[0].cloud_id.as_deref(), Some(cloud_id.as_str()));
}

#[tokio::test]
async fn test_every_unsynced_record_uploads_once() {
    let remote = Arc::new(InMemoryTable::new());
    let a = client(&remote);
    add_tag(&a, "Build");
    add_tag(&a, "Review");
    for d in 1..=3 {
        add_session(&a, NewSession::new(day(d), 1.5, "Work"));
    }

    let result = a.sync().await.unwrap();
    assert_eq!(result.tags_uploaded, 2);
    assert_eq!(result.sessions_uploaded, 3);
    assert_eq!(remote.calls(Operation::PutItem), 5);

    let sessions = a.storage().with_connection(queries::all_sessions).unwrap();
    let mut ids: Vec<String> = sessions.iter().filter_map(|s| s.cloud_id.clone()).collect();
    assert_eq!(ids.len(), 3);
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn test_second_sync_is_a_no_op() {
    let remote = Arc::new(InMemoryTable::new());
    let a = client(&remote);
    let tag = add_tag(&a, "Build");
    add_session(&a, NewSession::new(day(4), 2.0, "Pipeline").with_tag(tag));
    add_session(&a, NewSession::new(day(5), 0.5, "Notes").with_notes("short"));

    let first = a.sync().await.unwrap();
    assert!(first.success);

    remote.reset_calls();
    let second = a.sync().await.unwrap();
    assert!(second.success);
    assert_eq!(second.tags_uploaded, 0);
    assert_eq!(second.tags_downloaded, 0);
    assert_eq!(second.sessions_uploaded, 0);
    assert_eq!(second.sessions_downloaded, 0);
    assert_eq!(remote.calls(Operation::PutItem), 0);
    assert_eq!(remote.calls(Operation::Query), 2);

    // A peer that pulled everything is also quiet on its next pass
    let b = client(&remote);
    b.sync().await.unwrap();
    let again = b.sync().await.unwrap();
    assert_eq!(
        again.message(),
        "Sync completed! Uploaded: 0 sessions, 0 tags. Downloaded: 0 sessions, 0 tags."
    );
}

#[tokio::test]
async fn test_newer_remote_overwrites_local() {
    let remote = Arc::new(InMemoryTable::new());
    let a = client(&remote);
    let id = add_tag(&a, "Build");
    a.sync().await.unwrap();

    let cloud_id = a
        .storage()
        .with_connection(|conn| queries::get_tag(conn, id))
        .unwrap()
        .cloud_id
        .unwrap();
    remote
        .insert(
            TAGS,
            item(json!({
                "ProfileId": {"S": PROFILE},
                "CloudId": {"S": cloud_id},
                "Name": {"S": "Build & Deploy"},
                "UpdatedAt": {"S": "2099-01-01T00:00:00Z"},
                "IsDeleted": {"BOOL": false}
            })),
        )
        .unwrap();

    let result = a.sync().await.unwrap();
    assert_eq!(result.tags_downloaded, 1);
    assert_eq!(result.tags_uploaded, 0);

    let tag = a
        .storage()
        .with_connection(|conn| queries::get_tag(conn, id))
        .unwrap();
    assert_eq!(tag.name, "Build & Deploy");
    assert_eq!(
        tag.updated_at,
        Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn test_newer_local_is_reuploaded() {
    let remote = Arc::new(InMemoryTable::new());
    let a = client(&remote);
    let id = add_tag(&a, "Build");
    a.sync().await.unwrap();

    let cloud_id = a
        .storage()
        .with_connection(|conn| queries::get_tag(conn, id))
        .unwrap()
        .cloud_id
        .unwrap();
    remote
        .insert(
            TAGS,
            item(json!({
                "ProfileId": {"S": PROFILE},
                "CloudId": {"S": cloud_id},
                "Name": {"S": "Stale"},
                "UpdatedAt": {"S": "2000-01-01T00:00:00Z"},
                "IsDeleted": {"BOOL": false}
            })),
        )
        .unwrap();

    let result = a.sync().await.unwrap();
    assert_eq!(result.tags_uploaded, 1);
    assert_eq!(result.tags_downloaded, 0);

    let stored = remote.get(TAGS, PROFILE, &cloud_id).unwrap();
    assert_eq!(s(&stored, "Name").as_deref(), Some("Build"));
    let tag = a
        .storage()
        .with_connection(|conn| queries::get_tag(conn, id))
        .unwrap();
    assert_eq!(tag.name, "Build");
}

#[tokio::test]
async fn test_remote_tags_merge_before_sessions() {
    let remote = Arc::new(InMemoryTable::new());
    remote
        .insert(
            TAGS,
            item(json!({
                "ProfileId": {"S": PROFILE},
                "CloudId": {"S": "t-1"},
                "Name": {"S": "Client X"},
                "UpdatedAt": {"S": "2024-03-01T09:00:00Z"},
                "IsDeleted": {"BOOL": false}
            })),
        )
        .unwrap();
    remote
        .insert(
            SESSIONS,
            item(json!({
                "ProfileId": {"S": PROFILE},
                "CloudId": {"S": "s-1"},
                "SessionDate": {"S": "2024-03-02"},
                "TimeHours": {"N": "3.5"},
                "Description": {"S": "Kickoff"},
                "TagCloudId": {"S": "t-1"},
                "CreatedAt": {"S": "2024-03-02T10:00:00Z"},
                "UpdatedAt": {"S": "2024-03-02T10:00:00Z"},
                "IsDeleted": {"BOOL": false}
            })),
        )
        .unwrap();
    remote
        .insert(
            SESSIONS,
            item(json!({
                "ProfileId": {"S": PROFILE},
                "CloudId": {"S": "s-2"},
                "SessionDate": {"S": "2024-03-02"},
                "TimeHours": {"N": "1"},
                "Description": {"S": "Orphan"},
                "TagCloudId": {"S": "t-unknown"},
                "UpdatedAt": {"S": "2024-03-02T11:00:00Z"}
            })),
        )
        .unwrap();

    let a = client(&remote);
    let result = a.sync().await.unwrap();
    assert!(result.success);
    assert_eq!(result.tags_downloaded, 1);
    assert_eq!(result.sessions_downloaded, 2);

    let (tags, sessions) = a
        .storage()
        .with_connection(|conn| {
            Ok((
                queries::list_tags(conn)?,
                queries::sessions_for_date(conn, day(2))?,
            ))
        })
        .unwrap();
    assert_eq!(tags.len(), 1);

    let kickoff = sessions.iter().find(|s| s.description == "Kickoff").unwrap();
    assert_eq!(kickoff.tag_id, Some(tags[0].id));
    assert_eq!(kickoff.tag_cloud_id.as_deref(), Some("t-1"));
    assert_eq!(kickoff.hours, 3.5);

    let orphan = sessions.iter().find(|s| s.description == "Orphan").unwrap();
    assert_eq!(orphan.tag_id, None);
    assert_eq!(orphan.tag_cloud_id.as_deref(), Some("t-unknown"));
}

#[tokio::test]
async fn test_session_upload_carries_tag_cloud_id() {
    let remote = Arc::new(InMemoryTable::new());
    let a = client(&remote);
    let tag = add_tag(&a, "Build");
    // Tag has no cloud id yet, so neither does the session's link
    let session = add_session(&a, NewSession::new(day(7), 4.0, "CI").with_tag(tag));

    a.sync().await.unwrap();

    let (tag, session) = a
        .storage()
        .with_connection(|conn| {
            Ok((
                queries::get_tag(conn, tag)?,
                queries::get_session(conn, session)?,
            ))
        })
        .unwrap();
    let tag_cloud_id = tag.cloud_id.unwrap();
    assert_eq!(session.tag_cloud_id.as_deref(), Some(tag_cloud_id.as_str()));

    let stored = remote
        .get(SESSIONS, PROFILE, session.cloud_id.as_deref().unwrap())
        .unwrap();
    assert_eq!(s(&stored, "TagCloudId"), Some(tag_cloud_id));
    assert_eq!(s(&stored, "SessionDate").as_deref(), Some("2024-03-07"));
    assert_eq!(stored.get("TimeHours"), Some(&AttributeValue::N("4".to_string())));
    assert!(stored.get("Notes").is_none());
}

#[tokio::test]
async fn test_remote_soft_delete_flags_local_row() {
    let remote = Arc::new(InMemoryTable::new());
    let a = client(&remote);
    let id = add_session(&a, NewSession::new(day(9), 6.0, "Refactor"));
    a.sync().await.unwrap();

    let cloud_id = a
        .storage()
        .with_connection(|conn| queries::get_session(conn, id))
        .unwrap()
        .cloud_id
        .unwrap();
    let mut stored = remote.get(SESSIONS, PROFILE, &cloud_id).unwrap();
    stored.insert("IsDeleted".to_string(), AttributeValue::Bool(true));
    stored.insert(
        "UpdatedAt".to_string(),
        AttributeValue::S("2099-06-01T00:00:00Z".to_string()),
    );
    remote.insert(SESSIONS, stored).unwrap();

    let result = a.sync().await.unwrap();
    assert_eq!(result.sessions_downloaded, 1);

    let (session, live, hours) = a
        .storage()
        .with_connection(|conn| {
            Ok((
                queries::get_session(conn, id)?,
                queries::sessions_for_date(conn, day(9))?,
                queries::total_hours_for_date(conn, day(9))?,
            ))
        })
        .unwrap();
    assert!(session.is_deleted);
    assert!(live.is_empty());
    assert_eq!(hours, 0.0);
}

#[tokio::test]
async fn test_deleted_remote_only_records_are_skipped() {
    let remote = Arc::new(InMemoryTable::new());
    remote
        .insert(
            TAGS,
            item(json!({
                "ProfileId": {"S": PROFILE},
                "CloudId": {"S": "t-gone"},
                "Name": {"S": "Gone"},
                "UpdatedAt": {"S": "2024-03-01T09:00:00Z"},
                "IsDeleted": {"BOOL": true}
            })),
        )
        .unwrap();

    let a = client(&remote);
    let result = a.sync().await.unwrap();
    assert_eq!(result.tags_downloaded, 0);
    assert!(a.storage().with_connection(queries::all_tags).unwrap().is_empty());
}

#[tokio::test]
async fn test_unsynced_local_tag_adopts_remote_with_same_name() {
    let remote = Arc::new(InMemoryTable::new());
    remote
        .insert(
            TAGS,
            item(json!({
                "ProfileId": {"S": PROFILE},
                "CloudId": {"S": "t-9"},
                "Name": {"S": "Build"},
                "UpdatedAt": {"S": "2000-01-01T00:00:00Z"},
                "IsDeleted": {"BOOL": false}
            })),
        )
        .unwrap();

    let a = client(&remote);
    let id = add_tag(&a, "Build");
    let result = a.sync().await.unwrap();
    assert!(result.success);

    let tags = a.storage().with_connection(queries::all_tags).unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].id, id);
    assert_eq!(tags[0].cloud_id.as_deref(), Some("t-9"));
    // Local copy is newer, so it wins and is pushed back
    assert_eq!(result.tags_uploaded, 1);
    assert_eq!(remote.items(TAGS).len(), 1);
}

fn remote_tag(cloud_id: &str, name: &str) -> Item {
    item(json!({
        "ProfileId": {"S": PROFILE},
        "CloudId": {"S": cloud_id},
        "Name": {"S": name},
        "UpdatedAt": {"S": "2024-03-01T09:00:00Z"},
        "IsDeleted": {"BOOL": false}
    }))
}

#[tokio::test]
async fn test_session_relinks_when_its_tag_arrives_later() {
    let remote = Arc::new(InMemoryTable::new());
    remote
        .insert(
            SESSIONS,
            item(json!({
                "ProfileId": {"S": PROFILE},
                "CloudId": {"S": "s-1"},
                "SessionDate": {"S": "2024-03-04"},
                "TimeHours": {"N": "2"},
                "Description": {"S": "Early arrival"},
                "TagCloudId": {"S": "t-1"},
                "CreatedAt": {"S": "2024-03-04T10:00:00Z"},
                "UpdatedAt": {"S": "2024-03-04T10:00:00Z"},
                "IsDeleted": {"BOOL": false}
            })),
        )
        .unwrap();

    let a = client(&remote);
    let first = a.sync().await.unwrap();
    assert!(first.success);
    assert_eq!(first.downloaded(Collection::Sessions), 1);

    let session = a
        .storage()
        .with_connection(|conn| queries::get_session(conn, 1))
        .unwrap();
    assert_eq!(session.tag_id, None);
    assert_eq!(session.tag_cloud_id.as_deref(), Some("t-1"));

    remote.insert(TAGS, remote_tag("t-1", "Client X")).unwrap();
    let second = a.sync().await.unwrap();
    assert!(second.success);
    assert_eq!(second.downloaded(Collection::Tags), 1);
    assert_eq!(second.uploaded(Collection::Sessions), 0);

    let (tags, session) = a
        .storage()
        .with_connection(|conn| Ok((queries::all_tags(conn)?, queries::get_session(conn, 1)?)))
        .unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(session.tag_id, Some(tags[0].id));
    assert_eq!(session.tag_cloud_id.as_deref(), Some("t-1"));

    // Remote link survives a later local edit
    a.storage()
        .with_connection(|conn| {
            queries::update_session(
                conn,
                1,
                &NewSession::new(day(4), 2.5, "Early arrival").with_tag(tags[0].id),
            )
        })
        .unwrap();
    let third = a.sync().await.unwrap();
    assert_eq!(third.uploaded(Collection::Sessions), 1);
    let uploaded = remote.get(SESSIONS, PROFILE, "s-1").unwrap();
    assert_eq!(s(&uploaded, "TagCloudId").as_deref(), Some("t-1"));
}

#[tokio::test]
async fn test_duplicate_remote_tag_names_do_not_fail_the_pass() {
    let remote = Arc::new(InMemoryTable::new());
    remote.insert(TAGS, remote_tag("c-a", "Build")).unwrap();
    remote.insert(TAGS, remote_tag("c-b", "Build")).unwrap();

    let a = client(&remote);
    for pass in 0..3 {
        let result = a.sync().await.unwrap();
        assert!(result.success, "pass {}: {}", pass, result.message());
        assert_eq!(result.error_message, None);
        let expected = if pass == 0 { 1 } else { 0 };
        assert_eq!(result.downloaded(Collection::Tags), expected);
    }

    let tags = a.storage().with_connection(queries::all_tags).unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].name, "Build");
    assert_eq!(tags[0].cloud_id.as_deref(), Some("c-a"));
    // Neither remote copy is touched
    assert_eq!(remote.items(TAGS).len(), 2);
}

#[tokio::test]
async fn test_remote_tag_named_like_a_synced_local_tag_is_skipped() {
    let remote = Arc::new(InMemoryTable::new());
    let a = client(&remote);
    add_tag(&a, "Build");
    assert!(a.sync().await.unwrap().success);

    // Another device uploaded its own "Build" before seeing ours
    remote.insert(TAGS, remote_tag("other-device", "Build")).unwrap();
    let result = a.sync().await.unwrap();
    assert!(result.success, "{}", result.message());
    assert_eq!(result.downloaded(Collection::Tags), 0);
    assert_eq!(
        a.storage().with_connection(queries::all_tags).unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_failed_uploads_are_reported_and_retried_next_pass() {
    let remote = Arc::new(InMemoryTable::new());
    remote.fail(Operation::PutItem, "HTTP 500: InternalServerError: boom");
    let a = client(&remote);
    let tag = add_tag(&a, "Build");
    add_session(&a, NewSession::new(day(11), 1.0, "Fix"));

    let failed = a.sync().await.unwrap();
    assert!(!failed.success);
    assert_eq!(failed.tags_uploaded, 0);
    assert_eq!(
        failed.message(),
        "Sync failed: HTTP 500: InternalServerError: boom"
    );
    assert_eq!(a.phase(), SyncPhase::Idle);

    // Cloud ids stay assigned; the next pass uploads under them
    let cloud_id = a
        .storage()
        .with_connection(|conn| queries::get_tag(conn, tag))
        .unwrap()
        .cloud_id
        .unwrap();

    remote.clear_failures();
    let healed = a.sync().await.unwrap();
    assert!(healed.success);
    assert_eq!(healed.tags_uploaded, 1);
    assert_eq!(healed.sessions_uploaded, 1);
    assert!(remote.get(TAGS, PROFILE, &cloud_id).is_some());
}

#[tokio::test]
async fn test_uploads_run_concurrently() {
    let remote = Arc::new(InMemoryTable::new());
    let a = client(&remote);
    for name in ["A", "B", "C", "D"] {
        add_tag(&a, name);
    }

    let result = a.sync().await.unwrap();
    assert_eq!(result.tags_uploaded, 4);
    assert!(remote.max_concurrent_puts() >= 2);
}

#[tokio::test]
async fn test_concurrent_sync_is_rejected() {
    let remote = Arc::new(InMemoryTable::new());
    let a = client(&remote);
    add_tag(&a, "Build");

    let (first, second) = tokio::join!(a.sync(), a.sync());
    assert!(first.unwrap().success);
    assert!(matches!(second, Err(WorklogError::AlreadyInProgress)));
    assert!(!a.is_syncing());

    // Once idle again a new pass is accepted
    assert!(a.sync().await.is_ok());
}

#[tokio::test]
async fn test_unconfigured_sync_fails_fast() {
    let remote = Arc::new(InMemoryTable::new());
    let mut config = config();
    config.profile_id.clear();
    let a = SyncOrchestrator::new(Storage::open_in_memory().unwrap(), remote.clone(), config);

    let err = a.sync().await.unwrap_err();
    assert!(matches!(err, WorklogError::NotConfigured));
    assert_eq!(err.to_string(), "Sync not configured");
    assert_eq!(remote.calls(Operation::Query), 0);
}

#[tokio::test]
async fn test_malformed_remote_items_are_skipped() {
    let remote = Arc::new(InMemoryTable::new());
    remote
        .insert(
            SESSIONS,
            item(json!({
                "ProfileId": {"S": PROFILE},
                "CloudId": {"S": "s-bad"},
                "SessionDate": {"S": "not a date"}
            })),
        )
        .unwrap();

    let a = client(&remote);
    let result = a.sync().await.unwrap();
    assert!(result.success);
    assert_eq!(result.sessions_downloaded, 0);
    assert!(a.storage().with_connection(queries::all_sessions).unwrap().is_empty());
}

#[tokio::test]
async fn test_events_and_status() {
    let remote = Arc::new(InMemoryTable::new());
    let a = client(&remote);
    add_tag(&a, "Build");
    assert!(a.status().unwrap().last_sync.is_none());

    let mut events = a.subscribe();
    let result = a.sync().await.unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert_eq!(received.first(), Some(&SyncEvent::Started));
    assert!(received.contains(&SyncEvent::DataChanged));
    assert_eq!(received.last(), Some(&SyncEvent::Completed(result)));

    let status = a.status().unwrap();
    assert!(status.is_configured);
    assert_eq!(status.phase, SyncPhase::Idle);
    assert!(status.last_sync.is_some());
}
