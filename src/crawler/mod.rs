//! Crawler module: the crawl pipeline on top of the process pool
//!
//! This module contains the crawl-specific logic, including:
//! - The messages exchanged between primary and workers
//! - The primary's per-URL state machine and its write-back buffer
//! - Worker handlers for robots checks, HEAD/GET requests and spidering
//! - Link extraction and progress tracking
//! - Queue maintenance (blessing domains, reprioritizing)

mod maintenance;
mod messages;
mod parser;
mod primary;
mod progress;
mod worker;
mod writeback;

pub use maintenance::{bless_domains, reprioritize};
pub use messages::{CrawlTask, FoundUrl, PrimaryMessage, RequestError, WorkerMessage};
pub use parser::{extract_links, find_urls, is_html, parse_document};
pub use primary::{check_eligibility, CrawlPrimary, Rejection, MAX_REQUEST_ERRORS};
pub use progress::ProgressTracker;
pub use worker::CrawlWorker;
pub use writeback::{FlushStats, WriteBack};

use crate::config::Config;
use crate::dispatch::{Dispatcher, InProcessLauncher, Launcher};
use crate::storage::Storage;

/// Runs a crawl to completion (or interruption) with the given launcher
///
/// Returns the primary once every worker has exited and the final
/// write-back has been flushed.
///
/// # Arguments
///
/// * `config` - The validated configuration, also sent to each worker
/// * `storage` - The queue and results database
/// * `launcher` - How workers are started
/// * `listen_for_signals` - Route SIGINT/SIGUSR1/SIGUSR2 to the dispatcher
pub async fn run_spider<S, L>(
    config: Config,
    storage: S,
    launcher: L,
    listen_for_signals: bool,
) -> crate::Result<CrawlPrimary<S>>
where
    S: Storage,
    L: Launcher,
{
    let workers = config.worker_count();
    let primary = CrawlPrimary::new(config, storage)?;
    let dispatcher = Dispatcher::new(primary, launcher, workers);

    if listen_for_signals {
        dispatcher.control().listen_for_signals();
    }

    dispatcher.run().await
}

/// Launcher running `CrawlWorker`s as tasks in this process
pub fn in_process_launcher() -> InProcessLauncher<CrawlWorker> {
    InProcessLauncher::new(CrawlWorker::new)
}
