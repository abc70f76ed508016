//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::fetch::FetchedRequest;
use crate::queue::Priority;
use crate::storage::{DomainPolicy, QueueItem, QueueStatus, Session};
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    /// The hostname cannot be stored in the domain registry
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StorageError {
    /// Stable code for errors that callers branch on
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidDomain(_) => "INVALID_DOMAIN",
            Self::Database(_) | Self::Sqlite(_) => "DATABASE",
            Self::Serialization(_) => "SERIALIZATION",
            Self::Io(_) => "IO",
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This is everything the crawl needs from its database. Every write is
/// idempotent or additive, because a write-back may be retried after a
/// partial failure.
pub trait Storage {
    // ===== Sessions =====

    /// Starts a new session; one per primary run
    fn create_session(&mut self) -> StorageResult<Session>;

    // ===== Queue =====

    /// Reads up to `limit` unconsumed items with priority >= 0
    ///
    /// Ordered by priority descending, ties in random order. Items whose id
    /// is in `exclude` are never returned.
    fn next_queue_batch(
        &self,
        limit: usize,
        exclude: &HashSet<i64>,
    ) -> StorageResult<Vec<QueueItem>>;

    /// Marks a queue item consumed; the row is kept for reporting
    fn consume(&mut self, queue_item_id: i64) -> StorageResult<()>;

    /// Adds a URL to the queue
    ///
    /// With `replace_existing`, any existing entry for the URL (consumed or
    /// not) is replaced by a fresh unconsumed one at `priority`. Otherwise an
    /// existing entry is left untouched.
    fn enqueue(&mut self, url: &Url, priority: Priority, replace_existing: bool)
        -> StorageResult<()>;

    /// Counts queue items per priority
    fn queue_status(&self) -> StorageResult<QueueStatus>;

    /// Every unconsumed item, regardless of priority
    fn unconsumed_items(&self) -> StorageResult<Vec<QueueItem>>;

    /// Overwrites the priority of one queue item
    fn set_priority(&mut self, queue_item_id: i64, priority: Priority) -> StorageResult<()>;

    // ===== Domains =====

    /// Looks up what is known about a hostname
    fn domain_policy(&self, hostname: &str) -> StorageResult<DomainPolicy>;

    /// Sets every unconsumed queue item on `hostname` to `Ignore`
    fn set_domain_ignored(&mut self, hostname: &str) -> StorageResult<()>;

    /// Records an explicit spidering decision for each hostname
    fn mark_domains_ok_to_spider(&mut self, hostnames: &[String], ok: bool)
        -> StorageResult<()>;

    /// Adds one unit of strength to each named signal for a hostname
    fn save_domain_signals(&mut self, hostname: &str, signals: &[String]) -> StorageResult<()>;

    /// Hostnames with queued URLs but no successful or failed request yet
    ///
    /// `patterns` are OR'ed `LIKE` patterns on the full hostname where `*`
    /// matches anything. No patterns means every domain.
    fn unrequested_domains(&self, patterns: &[String]) -> StorageResult<Vec<String>>;

    // ===== Requests =====

    /// Stores a fetched response, returning the request id
    fn record_fetch(&mut self, session_id: i64, request: &FetchedRequest) -> StorageResult<i64>;

    /// Stores a failed fetch, returning the error id
    fn record_fetch_error(
        &mut self,
        session_id: i64,
        url: &str,
        code: &str,
        message: &str,
    ) -> StorageResult<i64>;

    /// The latest stored response for exactly this URL
    fn most_recent_fetch(&self, url: &str) -> StorageResult<Option<FetchedRequest>>;

    /// Decompressed content of one stored blob
    fn blob(&self, id: i64) -> StorageResult<Option<String>>;

    // ===== Transactions =====

    fn begin_transaction(&mut self) -> StorageResult<()>;

    fn commit_transaction(&mut self) -> StorageResult<()>;

    fn rollback_transaction(&mut self) -> StorageResult<()>;

    /// Runs `f` inside a transaction
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise. A failed commit
    /// is rolled back as well and returned as an error.
    fn with_transaction<T, F>(&mut self, f: F) -> StorageResult<T>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> StorageResult<T>,
    {
        self.begin_transaction()?;

        match f(self) {
            Ok(value) => match self.commit_transaction() {
                Ok(()) => Ok(value),
                Err(e) => {
                    if let Err(rollback) = self.rollback_transaction() {
                        tracing::warn!("Rollback after failed commit also failed: {}", rollback);
                    }
                    Err(e)
                }
            },
            Err(e) => {
                if let Err(rollback) = self.rollback_transaction() {
                    tracing::warn!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }
}
