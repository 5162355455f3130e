//! Storage engine for WorkLog
//!
//! Handles SQLite database operations, WAL mode, and schema management.

mod connection;
mod migrations;
pub mod queries;

pub use connection::Storage;
pub use migrations::SCHEMA_VERSION;
