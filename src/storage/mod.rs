//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - The durable work queue and its soft-delete consumption marker
//! - The hierarchical domain registry and per-domain spidering decisions
//! - Content-addressed, gzip-compressed blobs for fetched headers and bodies
//! - Sessions, requests, request errors and domain signals

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::queue::Priority;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Opens (and migrates) the SQLite database at `path`
pub fn open_storage(path: &Path) -> crate::Result<SqliteStorage> {
    Ok(SqliteStorage::new(path)?)
}

/// One URL pending or already consumed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: i64,
    pub url: String,
    /// Lowercase hostname from the domain registry
    pub hostname: String,
    pub priority: Priority,
    /// Milliseconds since the epoch
    pub enqueued_at: i64,
    pub consumed: bool,
}

/// One primary-process run
#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub started_at: DateTime<Utc>,
}

/// What storage knows about a hostname
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DomainPolicy {
    /// The hostname is in the domain registry
    pub known: bool,
    /// Explicit decision; `None` when nobody has decided yet
    pub ok_to_spider: Option<bool>,
}

/// Queue counts by priority; `processed` counts consumed items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStatus {
    pub ignore: u64,
    pub low: u64,
    pub medium: u64,
    pub high: u64,
    pub processed: u64,
}

impl QueueStatus {
    /// Items that a scan would still return
    pub fn pending(&self) -> u64 {
        self.low + self.medium + self.high
    }
}
