use super::pool::Pool;
use super::{Envelope, WorkerId};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::marker::PhantomData;

/// Result of asking the primary for more work
#[derive(Debug, Clone, PartialEq)]
pub enum Next<M> {
    /// Send this message to the worker that asked
    Work(M),
    /// An item was dealt with without a worker; ask again
    Skip,
    /// Nothing to do right now
    Stop,
}

/// The primary side of a process pool
///
/// Every method runs on the dispatcher's single task, one call at a time.
/// Errors are logged by the dispatcher and never stop it.
pub trait Primary {
    /// Messages sent to workers
    type Outbound: Serialize;
    /// Messages received from workers (and emitted locally)
    type Inbound;

    /// Decodes a worker message; unknown messages yield `None` and are dropped
    fn parse(&self, value: Value) -> Option<Self::Inbound>;

    /// Called once per worker before it is given any work
    ///
    /// Failing here tears the worker down.
    fn initialize_worker(
        &mut self,
        worker: WorkerId,
        ctx: &mut Context<'_, Self::Outbound, Self::Inbound>,
    ) -> crate::Result<()>;

    /// Handles one message from a worker or from `emit_local`
    fn handle(
        &mut self,
        message: Self::Inbound,
        ctx: &mut Context<'_, Self::Outbound, Self::Inbound>,
    ) -> crate::Result<()>;

    /// Produces the next unit of work for an idle worker
    fn next(
        &mut self,
        worker: WorkerId,
        ctx: &mut Context<'_, Self::Outbound, Self::Inbound>,
    ) -> crate::Result<Next<Self::Outbound>>;

    /// A worker exited; anything it was working on is lost
    fn on_worker_exit(&mut self, _worker: WorkerId) {}

    /// Called once after the last worker is gone
    fn finish(&mut self) -> crate::Result<()>;
}

/// Handle given to primary callbacks for talking to workers
pub struct Context<'a, O, I> {
    pool: &'a mut Pool,
    current: Option<WorkerId>,
    local: VecDeque<I>,
    _outbound: PhantomData<O>,
}

impl<'a, O: Serialize, I> Context<'a, O, I> {
    pub(super) fn new(pool: &'a mut Pool, current: Option<WorkerId>) -> Self {
        Self {
            pool,
            current,
            local: VecDeque::new(),
            _outbound: PhantomData,
        }
    }

    /// The worker whose message (or pull) is being handled
    pub fn current_worker(&self) -> Option<WorkerId> {
        self.current
    }

    /// Sends a message to the current worker, or the least-loaded one when
    /// the current worker is gone
    ///
    /// Returns the worker the message went to, or `None` when no worker
    /// could take it.
    pub fn send(&mut self, message: O) -> Option<WorkerId> {
        let line = encode(&message)?;

        if let Some(current) = self.current {
            if self.pool.write_line(current, line.clone()) {
                return Some(current);
            }
        }

        let fallback = self.pool.least_loaded()?;
        self.pool.write_line(fallback, line).then_some(fallback)
    }

    /// Sends a message to one specific worker
    pub fn send_to(&mut self, worker: WorkerId, message: O) -> bool {
        match encode(&message) {
            Some(line) => self.pool.write_line(worker, line),
            None => false,
        }
    }

    /// Sends a message to every initialized worker; returns how many got it
    pub fn broadcast(&mut self, message: &O) -> usize {
        let Some(line) = encode(message) else {
            return 0;
        };

        self.pool
            .initialized_ids()
            .into_iter()
            .filter(|id| self.pool.write_line(*id, line.clone()))
            .count()
    }

    /// Queues a message for this primary's own `handle`, run right after the
    /// current callback returns
    pub fn emit_local(&mut self, message: I) {
        self.local.push_back(message);
    }

    pub(crate) fn take_local(&mut self) -> Option<I> {
        self.local.pop_front()
    }
}

/// A single in-memory worker for exercising `Primary` implementations
#[cfg(test)]
pub(crate) struct TestHarness {
    pool: Pool,
    lines: tokio::sync::mpsc::UnboundedReceiver<String>,
}

#[cfg(test)]
impl TestHarness {
    pub const WORKER: WorkerId = 1;

    pub fn new() -> Self {
        let mut pool = Pool::default();
        let (tx, lines) = tokio::sync::mpsc::unbounded_channel();
        let (kill, _) = tokio::sync::oneshot::channel();
        pool.insert(Self::WORKER, tx, kill);
        if let Some(slot) = pool.get_mut(Self::WORKER) {
            slot.initialized = true;
        }
        Self { pool, lines }
    }

    pub fn context<O: Serialize, I>(&mut self) -> Context<'_, O, I> {
        Context::new(&mut self.pool, Some(Self::WORKER))
    }

    /// Closes the worker's input so every send fails
    pub fn close(&mut self) {
        self.pool.close_input(Self::WORKER);
    }

    /// Message bodies sent to the worker since the last call
    pub fn sent(&mut self) -> Vec<Value> {
        let mut bodies = Vec::new();
        while let Ok(line) = self.lines.try_recv() {
            if let Some(Envelope::Message { body }) = Envelope::from_line(&line) {
                bodies.push(body);
            }
        }
        bodies
    }
}

fn encode<O: Serialize>(message: &O) -> Option<String> {
    match Envelope::message(message).and_then(|e| e.to_line()) {
        Ok(line) => Some(line),
        Err(e) => {
            tracing::error!("Failed to encode message for worker: {}", e);
            None
        }
    }
}
