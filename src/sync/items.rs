//! Remote item encoding
//!
//! Items are maps of attribute name to a typed wrapper such as
//! `{"S": "text"}`, `{"N": "2.5"}` or `{"BOOL": true}`. Keys:
//! `ProfileId` (partition) and `CloudId` (sort).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorklogError};
use crate::types::{
    format_timestamp, parse_date, parse_timestamp, CloudSession, CloudTag, Session, Tag,
};

/// A typed attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    N(String),
    /// Base64 text as sent on the wire
    B(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "SS")]
    StringSet(Vec<String>),
    #[serde(rename = "NS")]
    NumberSet(Vec<String>),
    #[serde(rename = "BS")]
    BinarySet(Vec<String>),
    L(Vec<AttributeValue>),
    M(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_n(&self) -> Option<f64> {
        match self {
            AttributeValue::N(n) => n.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// One remote row. Ordered so the serialized payload is stable.
pub type Item = BTreeMap<String, AttributeValue>;

pub const PROFILE_ID: &str = "ProfileId";
pub const CLOUD_ID: &str = "CloudId";

fn s(item: &Item, key: &str) -> Option<String> {
    item.get(key).and_then(AttributeValue::as_s).map(str::to_string)
}

fn non_empty_s(item: &Item, key: &str) -> Option<String> {
    s(item, key).filter(|v| !v.trim().is_empty())
}

fn flag(item: &Item, key: &str) -> bool {
    item.get(key)
        .and_then(AttributeValue::as_bool)
        .unwrap_or(false)
}

fn cloud_id(item: &Item) -> Result<String> {
    non_empty_s(item, CLOUD_ID)
        .ok_or_else(|| WorklogError::InvalidInput("Remote item has no CloudId".to_string()))
}

fn put_s(item: &mut Item, key: &str, value: impl Into<String>) {
    item.insert(key.to_string(), AttributeValue::S(value.into()));
}

fn put_optional_s(item: &mut Item, key: &str, value: Option<&str>) {
    if let Some(v) = value.filter(|v| !v.is_empty()) {
        put_s(item, key, v);
    }
}

/// Decode a tag item. Missing attributes fall back to empty defaults.
pub fn decode_tag(item: &Item) -> Result<CloudTag> {
    Ok(CloudTag {
        cloud_id: cloud_id(item)?,
        name: s(item, "Name").unwrap_or_default(),
        updated_at: parse_timestamp(&s(item, "UpdatedAt").unwrap_or_default()),
        is_deleted: flag(item, "IsDeleted"),
    })
}

/// Decode a session item. The session date is the one attribute that must
/// be present and well formed.
pub fn decode_session(item: &Item) -> Result<CloudSession> {
    let cloud_id = cloud_id(item)?;
    let raw_date = s(item, "SessionDate").unwrap_or_default();
    let date = parse_date(&raw_date).ok_or_else(|| {
        WorklogError::InvalidInput(format!(
            "Remote session {} has invalid SessionDate '{}'",
            cloud_id, raw_date
        ))
    })?;

    Ok(CloudSession {
        date,
        hours: item
            .get("TimeHours")
            .and_then(AttributeValue::as_n)
            .unwrap_or(0.0),
        description: s(item, "Description").unwrap_or_default(),
        notes: non_empty_s(item, "Notes"),
        next_stage: non_empty_s(item, "NextPlannedStage"),
        tag_cloud_id: non_empty_s(item, "TagCloudId"),
        created_at: parse_timestamp(&s(item, "CreatedAt").unwrap_or_default()),
        updated_at: parse_timestamp(&s(item, "UpdatedAt").unwrap_or_default()),
        is_deleted: flag(item, "IsDeleted"),
        cloud_id,
    })
}

/// Encode a local tag for upload. The tag must already carry a cloud id.
pub fn encode_tag(profile_id: &str, tag: &Tag) -> Result<Item> {
    let cloud_id = tag.cloud_id.as_deref().ok_or_else(|| {
        WorklogError::Internal(format!("Tag {} has no cloud id to upload", tag.id))
    })?;

    let mut item = Item::new();
    put_s(&mut item, PROFILE_ID, profile_id);
    put_s(&mut item, CLOUD_ID, cloud_id);
    put_s(&mut item, "Name", tag.name.as_str());
    put_s(&mut item, "UpdatedAt", format_timestamp(&tag.updated_at));
    item.insert("IsDeleted".to_string(), AttributeValue::Bool(tag.is_deleted));
    Ok(item)
}

/// Encode a local session for upload. Empty optional fields are omitted.
pub fn encode_session(profile_id: &str, session: &Session) -> Result<Item> {
    let cloud_id = session.cloud_id.as_deref().ok_or_else(|| {
        WorklogError::Internal(format!("Session {} has no cloud id to upload", session.id))
    })?;

    let mut item = Item::new();
    put_s(&mut item, PROFILE_ID, profile_id);
    put_s(&mut item, CLOUD_ID, cloud_id);
    put_s(&mut item, "SessionDate", session.date.format("%Y-%m-%d").to_string());
    item.insert(
        "TimeHours".to_string(),
        AttributeValue::N(session.hours.to_string()),
    );
    put_s(&mut item, "Description", session.description.as_str());
    put_optional_s(&mut item, "Notes", session.notes.as_deref());
    put_optional_s(&mut item, "NextPlannedStage", session.next_stage.as_deref());
    put_optional_s(&mut item, "TagCloudId", session.tag_cloud_id.as_deref());
    put_s(&mut item, "CreatedAt", format_timestamp(&session.created_at));
    put_s(&mut item, "UpdatedAt", format_timestamp(&session.updated_at));
    item.insert(
        "IsDeleted".to_string(),
        AttributeValue::Bool(session.is_deleted),
    );
    Ok(item)
}
