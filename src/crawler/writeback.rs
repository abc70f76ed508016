//! Buffered, transactional write-back of crawl results
//!
//! The primary collects every mutation produced while handling messages and
//! applies them together once per dispatch iteration. Within a flush, each
//! write is attempted on its own; one that fails is kept for the next flush
//! instead of aborting the rest. All writes are idempotent, so retrying a
//! write that did land is harmless.

use crate::fetch::FetchedRequest;
use crate::queue::Priority;
use crate::storage::{Storage, StorageError, StorageResult};
use std::collections::{BTreeSet, HashMap};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
struct PendingEnqueue {
    url: Url,
    priority: Priority,
    replace_existing: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct PendingError {
    session_id: i64,
    url: String,
    code: String,
    message: String,
}

/// Everything waiting to be written
#[derive(Debug, Default)]
struct Mutations {
    /// Keyed by URL; the latest priority wins
    enqueues: HashMap<String, PendingEnqueue>,
    requests: Vec<(i64, FetchedRequest)>,
    errors: Vec<PendingError>,
    consumes: BTreeSet<i64>,
    ignored_domains: BTreeSet<String>,
    signals: Vec<(String, Vec<String>)>,
}

impl Mutations {
    fn len(&self) -> usize {
        self.enqueues.len()
            + self.requests.len()
            + self.errors.len()
            + self.consumes.len()
            + self.ignored_domains.len()
            + self.signals.len()
    }

    /// Merges older mutations back in without overriding newer enqueues
    fn merge_older(&mut self, older: Mutations) {
        for (url, enqueue) in older.enqueues {
            self.enqueues.entry(url).or_insert(enqueue);
        }
        self.requests.extend(older.requests);
        self.errors.extend(older.errors);
        self.consumes.extend(older.consumes);
        self.ignored_domains.extend(older.ignored_domains);
        self.signals.extend(older.signals);
    }
}

/// Outcome of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub written: usize,
    pub retained: usize,
    pub dropped: usize,
}

/// The primary's write-back buffer
#[derive(Debug, Default)]
pub struct WriteBack {
    pending: Mutations,
}

impl WriteBack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.len() == 0
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Queues a URL for insertion
    pub fn enqueue(&mut self, url: Url, priority: Priority, replace_existing: bool) {
        self.pending.enqueues.insert(
            url.to_string(),
            PendingEnqueue {
                url,
                priority,
                replace_existing,
            },
        );
    }

    pub fn record_fetch(&mut self, session_id: i64, request: FetchedRequest) {
        self.pending.requests.push((session_id, request));
    }

    pub fn record_fetch_error(&mut self, session_id: i64, url: &str, code: &str, message: &str) {
        self.pending.errors.push(PendingError {
            session_id,
            url: url.to_string(),
            code: code.to_string(),
            message: message.to_string(),
        });
    }

    pub fn consume(&mut self, queue_item_id: i64) {
        self.pending.consumes.insert(queue_item_id);
    }

    /// Ids waiting to be consumed
    pub fn pending_consumes(&self) -> impl Iterator<Item = i64> + '_ {
        self.pending.consumes.iter().copied()
    }

    pub fn ignore_domain(&mut self, hostname: &str) {
        self.pending.ignored_domains.insert(hostname.to_string());
    }

    pub fn save_signals(&mut self, hostname: &str, signals: Vec<String>) {
        if !signals.is_empty() {
            self.pending.signals.push((hostname.to_string(), signals));
        }
    }

    /// Writes everything buffered inside one transaction
    ///
    /// Order: enqueues, requests, request errors, consumptions, ignored
    /// domains, signals. Individual failures are kept for the next flush
    /// (enqueues with an invalid domain are dropped). If the transaction
    /// itself fails, everything is kept.
    pub fn flush<S: Storage>(&mut self, storage: &mut S) -> StorageResult<FlushStats> {
        if self.is_empty() {
            return Ok(FlushStats::default());
        }

        let batch = std::mem::take(&mut self.pending);
        let result = storage.with_transaction(|s| Ok(apply(s, &batch)));

        match result {
            Ok((retry, mut stats)) => {
                stats.retained = retry.len();
                self.pending.merge_older(retry);
                if stats.retained > 0 || stats.dropped > 0 {
                    tracing::debug!(
                        "Write-back: {} written, {} kept for retry, {} dropped",
                        stats.written,
                        stats.retained,
                        stats.dropped
                    );
                }
                Ok(stats)
            }
            Err(e) => {
                tracing::error!("Write-back transaction failed, keeping {} writes: {}", batch.len(), e);
                self.pending.merge_older(batch);
                Err(e)
            }
        }
    }
}

fn apply<S: Storage>(storage: &mut S, batch: &Mutations) -> (Mutations, FlushStats) {
    let mut retry = Mutations::default();
    let mut stats = FlushStats::default();

    for (key, enqueue) in &batch.enqueues {
        match storage.enqueue(&enqueue.url, enqueue.priority, enqueue.replace_existing) {
            Ok(()) => stats.written += 1,
            Err(StorageError::InvalidDomain(host)) => {
                tracing::warn!("URL has an invalid domain ({}), not enqueueing: {}", host, key);
                stats.dropped += 1;
            }
            Err(e) => {
                tracing::warn!("Error enqueueing {} (will retry): {}", key, e);
                retry.enqueues.insert(key.clone(), enqueue.clone());
            }
        }
    }

    for (session_id, request) in &batch.requests {
        match storage.record_fetch(*session_id, request) {
            Ok(_) => stats.written += 1,
            Err(e) => {
                tracing::warn!("Error inserting request for {} (will retry): {}", request.url, e);
                retry.requests.push((*session_id, request.clone()));
            }
        }
    }

    for error in &batch.errors {
        match storage.record_fetch_error(error.session_id, &error.url, &error.code, &error.message) {
            Ok(_) => stats.written += 1,
            Err(e) => {
                tracing::warn!("Error inserting request error for {} (will retry): {}", error.url, e);
                retry.errors.push(error.clone());
            }
        }
    }

    for id in &batch.consumes {
        match storage.consume(*id) {
            Ok(()) => stats.written += 1,
            Err(e) => {
                tracing::warn!("Error consuming queue item #{} (will retry): {}", id, e);
                retry.consumes.insert(*id);
            }
        }
    }

    for hostname in &batch.ignored_domains {
        match storage.set_domain_ignored(hostname) {
            Ok(()) => stats.written += 1,
            Err(e) => {
                tracing::warn!("Error ignoring queue items for {} (will retry): {}", hostname, e);
                retry.ignored_domains.insert(hostname.clone());
            }
        }
    }

    for (hostname, signals) in &batch.signals {
        match storage.save_domain_signals(hostname, signals) {
            Ok(()) => stats.written += 1,
            Err(StorageError::InvalidDomain(_)) => stats.dropped += 1,
            Err(e) => {
                tracing::warn!("Error saving signals for {} (will retry): {}", hostname, e);
                retry.signals.push((hostname.clone(), signals.clone()));
            }
        }
    }

    (retry, stats)
}
