//! Primary/worker process pool
//!
//! This module runs one primary and a pool of workers that exchange typed
//! messages over newline-delimited JSON, including:
//! - Spawning workers and keeping the desired number alive
//! - Initializing each worker once before it receives work
//! - Pull-based dispatch driven by workers reporting they are idle
//! - Busy-based backpressure and live resizing of the pool
//! - Graceful shutdown on interrupt, forced exit on a second one
//!
//! All primary-side handlers run on a single task, one at a time, so the
//! primary's state needs no locking.

mod dispatcher;
mod envelope;
mod launcher;
mod pool;
mod primary;
mod worker;

pub use dispatcher::{DispatchControl, Dispatcher};
pub use envelope::Envelope;
pub use launcher::{InProcessLauncher, Launcher, ProcessLauncher, WorkerLink};
pub use primary::{Context, Next, Primary};
#[cfg(test)]
pub(crate) use primary::TestHarness;
pub use worker::{serve, Outbox, Worker};

use thiserror::Error;

/// Identifies one worker for the lifetime of the primary process
///
/// Ids are never reused, so a respawned worker gets a new id.
pub type WorkerId = usize;

/// Errors raised by the process pool itself
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Worker {0} has no {1} pipe")]
    MissingPipe(WorkerId, &'static str),

    #[error("Cannot locate the current executable: {0}")]
    CurrentExe(#[source] std::io::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Worker {0} is not accepting messages")]
    Undeliverable(WorkerId),
}
