//! Sync configuration persisted as JSON
//!
//! The file uses PascalCase keys so it stays interchangeable with other
//! WorkLog clients:
//!
//! ```json
//! {
//!   "AwsAccessKeyId": "AKIA...",
//!   "AwsSecretAccessKey": "...",
//!   "AwsRegion": "us-east-1",
//!   "ProfileId": "me",
//!   "SessionsTableName": "WorkLog_Sessions",
//!   "TagsTableName": "WorkLog_Tags"
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::signer::Credentials;
use crate::error::{Result, WorklogError};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_SESSIONS_TABLE: &str = "WorkLog_Sessions";
pub const DEFAULT_TAGS_TABLE: &str = "WorkLog_Tags";
pub const CONFIG_FILE_NAME: &str = "worklog-sync.json";

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_sessions_table() -> String {
    DEFAULT_SESSIONS_TABLE.to_string()
}

fn default_tags_table() -> String {
    DEFAULT_TAGS_TABLE.to_string()
}

/// Credentials, tenant and table names for cloud sync
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SyncConfig {
    #[serde(default)]
    pub aws_access_key_id: String,
    #[serde(default)]
    pub aws_secret_access_key: String,
    #[serde(default = "default_region")]
    pub aws_region: String,
    #[serde(default)]
    pub profile_id: String,
    #[serde(default = "default_sessions_table")]
    pub sessions_table_name: String,
    #[serde(default = "default_tags_table")]
    pub tags_table_name: String,
    /// Override for DynamoDB-compatible endpoints (e.g. DynamoDB Local)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            aws_access_key_id: String::new(),
            aws_secret_access_key: String::new(),
            aws_region: default_region(),
            profile_id: String::new(),
            sessions_table_name: default_sessions_table(),
            tags_table_name: default_tags_table(),
            endpoint: None,
        }
    }
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field("aws_secret_access_key", &"<redacted>")
            .field("aws_region", &self.aws_region)
            .field("profile_id", &self.profile_id)
            .field("sessions_table_name", &self.sessions_table_name)
            .field("tags_table_name", &self.tags_table_name)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl SyncConfig {
    /// Build a config from user-supplied credentials. An empty region falls
    /// back to the default.
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
        profile_id: impl Into<String>,
    ) -> Self {
        let region = region.into();
        Self {
            aws_access_key_id: access_key_id.into(),
            aws_secret_access_key: secret_access_key.into(),
            aws_region: if region.trim().is_empty() {
                default_region()
            } else {
                region
            },
            profile_id: profile_id.into(),
            ..Default::default()
        }
    }

    /// True when credentials and a profile are present
    pub fn is_configured(&self) -> bool {
        !self.aws_access_key_id.is_empty()
            && !self.aws_secret_access_key.is_empty()
            && !self.profile_id.is_empty()
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            access_key_id: self.aws_access_key_id.clone(),
            secret_access_key: self.aws_secret_access_key.clone(),
            region: self.aws_region.clone(),
        }
    }

    /// Regional service host, e.g. `dynamodb.us-east-1.amazonaws.com`
    pub fn host(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint
                .split("://")
                .last()
                .unwrap_or(endpoint)
                .trim_end_matches('/')
                .to_string(),
            None => format!("dynamodb.{}.amazonaws.com", self.aws_region),
        }
    }

    /// Request URL
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}", self.host()),
        }
    }

    /// Default config location: `<config dir>/worklog/worklog-sync.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("worklog")
            .join(CONFIG_FILE_NAME)
    }

    /// Load from a file. A missing file yields the unconfigured default.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = expand(path.as_ref());
        if !path.exists() {
            tracing::debug!("No sync config at {}", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)?;
        serde_json::from_str(&raw).map_err(|e| {
            WorklogError::Config(format!("Invalid sync config {}: {}", path.display(), e))
        })
    }

    /// Save as indented JSON, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = expand(path.as_ref());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        tracing::info!("Saved sync config to {}", path.display());
        Ok(())
    }

    /// Config built purely from `WORKLOG_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `WORKLOG_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        let vars = [
            ("WORKLOG_AWS_ACCESS_KEY_ID", &mut self.aws_access_key_id),
            ("WORKLOG_AWS_SECRET_ACCESS_KEY", &mut self.aws_secret_access_key),
            ("WORKLOG_AWS_REGION", &mut self.aws_region),
            ("WORKLOG_PROFILE_ID", &mut self.profile_id),
            ("WORKLOG_SESSIONS_TABLE", &mut self.sessions_table_name),
            ("WORKLOG_TAGS_TABLE", &mut self.tags_table_name),
        ];
        for (name, field) in vars {
            if let Ok(value) = std::env::var(name) {
                if !value.is_empty() {
                    *field = value;
                }
            }
        }
        if let Ok(endpoint) = std::env::var("WORKLOG_DYNAMODB_ENDPOINT") {
            if !endpoint.is_empty() {
                self.endpoint = Some(endpoint);
            }
        }
        self
    }
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).to_string())
}
