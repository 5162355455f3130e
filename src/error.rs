//! Error types for WorkLog

use thiserror::Error;

/// Result type alias for WorkLog operations
pub type Result<T> = std::result::Result<T, WorklogError>;

/// Main error type for WorkLog
#[derive(Error, Debug)]
pub enum WorklogError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Record not found: {0}")]
    NotFound(i64),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Sync not configured")]
    NotConfigured,

    #[error("Sync already in progress")]
    AlreadyInProgress,

    #[error("{0}")]
    Transport(String),

    #[error("Connection failed: {0}")]
    ConnectivityTest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(feature = "cloud")]
impl From<reqwest::Error> for WorklogError {
    fn from(e: reqwest::Error) -> Self {
        WorklogError::Transport(e.to_string())
    }
}

impl WorklogError {
    /// Check if re-running the operation could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorklogError::Transport(_))
    }

    /// Stable short code for CLI reporting
    pub fn code(&self) -> &'static str {
        match self {
            WorklogError::Database(_) => "database",
            WorklogError::NotFound(_) => "not_found",
            WorklogError::InvalidInput(_) => "invalid_input",
            WorklogError::NotConfigured => "not_configured",
            WorklogError::AlreadyInProgress => "already_in_progress",
            WorklogError::Transport(_) => "transport",
            WorklogError::ConnectivityTest(_) => "connectivity",
            WorklogError::Serialization(_) => "serialization",
            WorklogError::Io(_) => "io",
            WorklogError::Config(_) => "config",
            WorklogError::Internal(_) => "internal",
        }
    }
}
