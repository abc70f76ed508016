//! Priority queue scanner
//!
//! This module handles:
//! - Reading ready queue items from storage through a row buffer
//! - Building batches holding at most one item per hostname
//! - Stashing same-host items in a bounded overflow buffer for later batches
//! - Avoiding back-to-back items for the same hostname across batches

use crate::storage::{QueueItem, StorageResult};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Target number of items per batch
pub const BATCH_SIZE: usize = 25;

/// Bound on the overflow buffer; reaching it ends batch building early
pub const MAX_BUFFER_SIZE: usize = 250;

/// Wall-clock budget for building one batch
pub const MAX_BATCH_BUILD_TIME: Duration = Duration::from_secs(5);

/// Rows requested from storage per source read
pub const SOURCE_BUFFER_SIZE: usize = 100;

/// Serves queue items one at a time, spreading work across hostnames
///
/// The scanner never touches storage itself. Callers hand it a fetch function
/// `(limit, exclude) -> rows` that returns unconsumed, non-ignored items
/// ordered by priority and never returns an id in `exclude`. The scanner
/// adds every id it is holding to `exclude`, so an item is never held twice.
#[derive(Debug)]
pub struct QueueScanner {
    /// Rows read from storage but not yet looked at
    source: VecDeque<QueueItem>,

    /// Items that lost their batch slot to another item with the same host
    overflow: BTreeMap<i64, QueueItem>,

    /// The batch currently being served
    batch: VecDeque<QueueItem>,

    /// Hostname of the last item served
    last_host: Option<String>,

    batch_size: usize,
    max_buffer_size: usize,
    max_build_time: Duration,
}

impl Default for QueueScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueScanner {
    pub fn new() -> Self {
        Self::with_limits(BATCH_SIZE, MAX_BUFFER_SIZE, MAX_BATCH_BUILD_TIME)
    }

    /// Creates a scanner with custom limits
    pub fn with_limits(batch_size: usize, max_buffer_size: usize, max_build_time: Duration) -> Self {
        Self {
            source: VecDeque::new(),
            overflow: BTreeMap::new(),
            batch: VecDeque::new(),
            last_host: None,
            batch_size: batch_size.max(1),
            max_buffer_size: max_buffer_size.max(1),
            max_build_time,
        }
    }

    /// Returns the next item to process
    ///
    /// `exclude` holds ids the caller is already working on; items with those
    /// ids are skipped. Returns `None` once storage has nothing left and every
    /// buffer is empty.
    pub fn next_with<F>(
        &mut self,
        exclude: &HashSet<i64>,
        mut fetch_batch: F,
    ) -> StorageResult<Option<QueueItem>>
    where
        F: FnMut(usize, &HashSet<i64>) -> StorageResult<Vec<QueueItem>>,
    {
        self.batch.retain(|item| !exclude.contains(&item.id));

        if self.batch.is_empty() {
            self.build_batch(exclude, &mut fetch_batch)?;
        }

        let item = self.batch.pop_front();
        if let Some(item) = &item {
            self.last_host = Some(item.hostname.clone());
        }
        Ok(item)
    }

    /// Drops every held item for a hostname
    ///
    /// Used when a domain is ignored, so items already pulled from storage
    /// are not served after their priority was changed underneath them.
    pub fn forget_host(&mut self, hostname: &str) {
        self.source.retain(|item| item.hostname != hostname);
        self.overflow.retain(|_, item| item.hostname != hostname);
        self.batch.retain(|item| item.hostname != hostname);
    }

    /// Number of items held in memory across all buffers
    pub fn held(&self) -> usize {
        self.source.len() + self.overflow.len() + self.batch.len()
    }

    fn held_ids(&self, exclude: &HashSet<i64>) -> HashSet<i64> {
        let mut ids = exclude.clone();
        ids.extend(self.source.iter().map(|item| item.id));
        ids.extend(self.overflow.keys().copied());
        ids.extend(self.batch.iter().map(|item| item.id));
        ids
    }

    fn build_batch<F>(&mut self, exclude: &HashSet<i64>, fetch_batch: &mut F) -> StorageResult<()>
    where
        F: FnMut(usize, &HashSet<i64>) -> StorageResult<Vec<QueueItem>>,
    {
        let started = Instant::now();
        let mut hosts: HashSet<String> = HashSet::new();
        let mut batch: Vec<QueueItem> = Vec::new();

        self.overflow.retain(|id, _| !exclude.contains(id));

        // Overflow first, oldest ids first
        let candidates: Vec<i64> = self.overflow.keys().copied().collect();
        for id in candidates {
            if batch.len() >= self.batch_size {
                break;
            }
            let Some(host) = self.overflow.get(&id).map(|item| item.hostname.clone()) else {
                continue;
            };
            if hosts.contains(&host) {
                continue;
            }
            if let Some(item) = self.overflow.remove(&id) {
                hosts.insert(host);
                batch.push(item);
            }
        }

        while batch.len() < self.batch_size {
            if started.elapsed() > self.max_build_time {
                tracing::warn!(
                    "Hit max batch build time ({:?}), going with imperfect batch of {}",
                    self.max_build_time,
                    batch.len()
                );
                break;
            }

            let item = match self.source.pop_front() {
                Some(item) => item,
                None => {
                    let mut held = self.held_ids(exclude);
                    held.extend(batch.iter().map(|item| item.id));
                    let rows = fetch_batch(SOURCE_BUFFER_SIZE, &held)?;
                    if rows.is_empty() {
                        break;
                    }
                    self.source.extend(rows.into_iter().filter(|r| !held.contains(&r.id)));
                    continue;
                }
            };

            if exclude.contains(&item.id) {
                continue;
            }

            if hosts.contains(&item.hostname) {
                self.overflow.insert(item.id, item);

                if self.overflow.len() >= self.max_buffer_size {
                    tracing::warn!(
                        "Hit max buffer size ({}), going with imperfect batch of {}",
                        self.max_buffer_size,
                        batch.len()
                    );
                    break;
                }
                continue;
            }

            hosts.insert(item.hostname.clone());
            batch.push(item);
        }

        // Keep the previous host from being served twice in a row
        if batch.len() > 1 && batch.first().map(|i| &i.hostname) == self.last_host.as_ref() {
            batch.rotate_left(1);
        }

        tracing::debug!(
            "Built batch of {} items ({} in overflow)",
            batch.len(),
            self.overflow.len()
        );

        self.batch = batch.into();
        Ok(())
    }
}
