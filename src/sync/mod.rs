//! Cloud sync with a DynamoDB-compatible table store
//!
//! Tags and sessions are mirrored into two remote tables partitioned by
//! profile. Conflicts resolve last-write-wins on `updated_at`.
//!
//! # Feature Flags
//!
//! The HTTPS transport requires the `cloud` feature. Signing, item encoding,
//! conflict resolution and the orchestrator are always available.

pub mod config;
pub mod dynamo;
pub mod items;
mod orchestrator;
pub mod resolver;
pub mod signer;

pub use config::SyncConfig;
#[cfg(feature = "cloud")]
pub use dynamo::HttpTableClient;
pub use dynamo::{InMemoryTable, Operation, RemoteTable};
pub use items::{AttributeValue, Item};
pub use orchestrator::SyncOrchestrator;
pub use resolver::{Decision, RemoteOnly};
pub use signer::{Credentials, SigningRequest};
