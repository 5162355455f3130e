//! WorkLog - local-first time tracking
//!
//! Work sessions and tags live in SQLite and sync both ways with a pair of
//! DynamoDB tables using signed JSON requests.

pub mod error;
pub mod storage;
pub mod sync;
pub mod types;

pub use error::{Result, WorklogError};
pub use storage::Storage;
pub use sync::{SyncConfig, SyncOrchestrator};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
