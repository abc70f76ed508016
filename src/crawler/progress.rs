//! Advisory per-item progress tracking for the primary
//!
//! Every message about a queue item moves that item through the
//! `CrawlItemState` table. Illegal moves are logged and applied anyway; none
//! of this feeds back into crawl decisions.

use super::messages::PrimaryMessage;
use crate::state::CrawlItemState;
use crate::storage::QueueStatus;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Minimum time between two progress summaries
pub const SUMMARY_INTERVAL: Duration = Duration::from_secs(5);

/// How long finished items stay visible
const MAX_DONE_AGE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct TrackedItem {
    queue_item_id: i64,
    url: String,
    state: CrawlItemState,
    started_at: Instant,
    done: bool,
    error: Option<String>,
}

/// Tracks what the crawl is doing right now and what it recently finished
#[derive(Debug)]
pub struct ProgressTracker {
    items: Vec<TrackedItem>,
    /// Finished items per terminal state over the whole run
    totals: BTreeMap<CrawlItemState, u64>,
    last_summary: Option<Instant>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            totals: BTreeMap::new(),
            last_summary: None,
        }
    }

    /// Applies one message to the item it concerns
    pub fn update(&mut self, message: &PrimaryMessage) {
        let next = match message {
            PrimaryMessage::MakingHeadRequest { .. } => CrawlItemState::RequestHead,
            PrimaryMessage::MakingGetRequest { .. } => CrawlItemState::RequestGet,
            PrimaryMessage::GetRequestError { .. } => CrawlItemState::RequestGetError,
            PrimaryMessage::Spidering { .. } => CrawlItemState::Spidering,
            PrimaryMessage::Spidered { .. } => CrawlItemState::Spidered,
            PrimaryMessage::NotSpidering { .. } => CrawlItemState::NotSpidered,
            _ => {
                self.prune(Instant::now());
                return;
            }
        };

        let task = message.task();
        let now = Instant::now();
        let index = match self
            .items
            .iter()
            .position(|i| i.queue_item_id == task.queue_item_id && !i.done)
        {
            Some(index) => index,
            None => {
                self.items.push(TrackedItem {
                    queue_item_id: task.queue_item_id,
                    url: task.url.clone(),
                    state: CrawlItemState::Unknown,
                    started_at: now,
                    done: false,
                    error: None,
                });
                self.items.len() - 1
            }
        };

        let item = &mut self.items[index];
        if !item.state.can_transition_to(next) {
            tracing::warn!(
                "Invalid state transition for {}: {} -> {}",
                item.url,
                item.state,
                next
            );
        }
        item.state = next;

        match message {
            PrimaryMessage::GetRequestError { error, .. } | PrimaryMessage::NotSpidering { error, .. } => {
                item.error = Some(format!("{}: {}", error.code, error.message));
            }
            _ => {}
        }

        if next.is_terminal() {
            item.done = true;
            *self.totals.entry(next).or_insert(0) += 1;
            tracing::debug!(
                "#{} {} {} after {:?}{}",
                item.queue_item_id,
                next,
                item.url,
                item.started_at.elapsed(),
                item.error
                    .as_deref()
                    .map(|e| format!(" ({})", e))
                    .unwrap_or_default()
            );
        }

        self.prune(now);
    }

    /// Current state of the newest record for a queue item
    pub fn state_of(&self, queue_item_id: i64) -> Option<CrawlItemState> {
        self.items
            .iter()
            .rev()
            .find(|i| i.queue_item_id == queue_item_id)
            .map(|i| i.state)
    }

    /// Items that have not reached a terminal state
    pub fn active(&self) -> usize {
        self.items.iter().filter(|i| !i.done).count()
    }

    /// Finished items in `state` over the whole run
    pub fn total(&self, state: CrawlItemState) -> u64 {
        self.totals.get(&state).copied().unwrap_or(0)
    }

    /// True when no summary was logged within `SUMMARY_INTERVAL`
    pub fn summary_due(&self) -> bool {
        self.last_summary
            .map(|at| at.elapsed() >= SUMMARY_INTERVAL)
            .unwrap_or(true)
    }

    /// Logs counts per state and, when given, the queue status
    pub fn log_summary(&mut self, queue: Option<QueueStatus>) {
        self.last_summary = Some(Instant::now());

        let mut active: BTreeMap<CrawlItemState, usize> = BTreeMap::new();
        for item in self.items.iter().filter(|i| !i.done) {
            *active.entry(item.state).or_insert(0) += 1;
        }
        let active = active
            .iter()
            .map(|(state, count)| format!("{}={}", state, count))
            .collect::<Vec<_>>()
            .join(" ");

        tracing::info!(
            "Progress: in flight [{}], spidered {}, not spidered {}, get errors {}",
            active,
            self.total(CrawlItemState::Spidered),
            self.total(CrawlItemState::NotSpidered),
            self.total(CrawlItemState::RequestGetError)
        );

        if let Some(q) = queue {
            tracing::info!(
                "Queue: high {}, medium {}, low {}, ignore {}, processed {}",
                q.high,
                q.medium,
                q.low,
                q.ignore,
                q.processed
            );
        }
    }

    fn prune(&mut self, now: Instant) {
        self.items
            .retain(|i| !i.done || now.duration_since(i.started_at) < MAX_DONE_AGE);
    }
}
