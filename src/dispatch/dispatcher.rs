//! The primary's event loop

use super::pool::Pool;
use super::primary::{Context, Next, Primary};
use super::{Envelope, Launcher, WorkerId, WorkerLink};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

/// Delay before replacing a worker that died before it was initialized
const RESPAWN_DELAY: Duration = Duration::from_secs(1);

enum Event {
    Frame(WorkerId, Envelope),
    Exited(WorkerId),
    Respawn,
    Interrupt,
    Resize,
}

/// Shared handle for steering a running dispatcher from other tasks
#[derive(Clone)]
pub struct DispatchControl {
    desired: Arc<AtomicUsize>,
    events: mpsc::UnboundedSender<Event>,
}

impl DispatchControl {
    /// Desired number of workers
    pub fn workers(&self) -> usize {
        self.desired.load(Ordering::SeqCst)
    }

    /// Changes the desired number of workers (at least one)
    ///
    /// Extra workers are retired as they become idle.
    pub fn set_workers(&self, count: usize) {
        let count = count.max(1);
        let previous = self.desired.swap(count, Ordering::SeqCst);
        if previous != count {
            tracing::info!("Desired worker count: {} -> {}", previous, count);
            let _ = self.events.send(Event::Resize);
        }
    }

    /// Requests a graceful shutdown; a second request exits immediately
    pub fn interrupt(&self) {
        let _ = self.events.send(Event::Interrupt);
    }

    /// Routes SIGINT to `interrupt` and, on Unix, SIGUSR1/SIGUSR2 to
    /// raising/lowering the worker count by one
    pub fn listen_for_signals(&self) {
        let control = self.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                control.interrupt();
            }
        });

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            for (kind, delta) in [(SignalKind::user_defined1(), 1isize), (SignalKind::user_defined2(), -1)] {
                let control = self.clone();
                match signal(kind) {
                    Ok(mut stream) => {
                        tokio::spawn(async move {
                            while stream.recv().await.is_some() {
                                let current = control.workers();
                                control.set_workers(current.saturating_add_signed(delta));
                            }
                        });
                    }
                    Err(e) => tracing::warn!("Cannot listen for {:?}: {}", kind, e),
                }
            }
        }
    }
}

/// Drives a `Primary` and a pool of workers until the work runs out or the
/// process is interrupted
pub struct Dispatcher<P: Primary, L: Launcher> {
    primary: P,
    launcher: L,
    pool: Pool,
    control: DispatchControl,
    events: mpsc::UnboundedReceiver<Event>,
    next_id: WorkerId,
    pending_respawns: usize,
    interrupted: bool,
    finishing: bool,
}

impl<P: Primary, L: Launcher> Dispatcher<P, L> {
    pub fn new(primary: P, launcher: L, workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            primary,
            launcher,
            pool: Pool::default(),
            control: DispatchControl {
                desired: Arc::new(AtomicUsize::new(workers.max(1))),
                events: tx,
            },
            events: rx,
            next_id: 1,
            pending_respawns: 0,
            interrupted: false,
            finishing: false,
        }
    }

    pub fn control(&self) -> DispatchControl {
        self.control.clone()
    }

    /// Runs until every worker has exited, then calls `Primary::finish`
    ///
    /// Returns the primary so callers can inspect its final state.
    pub async fn run(mut self) -> crate::Result<P> {
        tracing::info!("Starting {} workers", self.control.workers());
        self.spawn_up_to();

        while !(self.stopping() && self.pool.is_empty() && self.pending_respawns == 0) {
            let Some(event) = self.events.recv().await else {
                break;
            };

            match event {
                Event::Frame(id, envelope) => self.on_frame(id, envelope),
                Event::Exited(id) => self.on_exit(id),
                Event::Respawn => {
                    self.pending_respawns = self.pending_respawns.saturating_sub(1);
                    self.spawn_up_to();
                }
                Event::Interrupt => self.on_interrupt(),
                Event::Resize => self.spawn_up_to(),
            }

            if !self.stopping() && self.pool.is_idle() {
                self.sweep();
            }
        }

        tracing::info!("All workers have exited");
        self.primary.finish()?;
        Ok(self.primary)
    }

    fn stopping(&self) -> bool {
        self.interrupted || self.finishing
    }

    fn spawn_up_to(&mut self) {
        if self.stopping() {
            return;
        }

        let desired = self.control.workers();
        while self.pool.open_count() + self.pending_respawns < desired {
            let id = self.next_id;
            self.next_id += 1;

            match self.launcher.launch(id) {
                Ok(link) => self.attach(id, link),
                Err(e) => {
                    tracing::error!("Failed to start worker {}: {}", id, e);
                    self.schedule_respawn();
                    break;
                }
            }
        }
    }

    fn schedule_respawn(&mut self) {
        self.pending_respawns += 1;
        let events = self.control.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RESPAWN_DELAY).await;
            let _ = events.send(Event::Respawn);
        });
    }

    /// Wires a new worker's pipes into the event loop
    fn attach(&mut self, id: WorkerId, link: WorkerLink) {
        let WorkerLink {
            mut input,
            output,
            exited,
            kill,
        } = link;

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                if let Err(e) = input.write_all(line.as_bytes()).await {
                    tracing::debug!("Worker {} stdin closed: {}", id, e);
                    return;
                }
                if let Err(e) = input.flush().await {
                    tracing::debug!("Worker {} stdin closed: {}", id, e);
                    return;
                }
            }
            let _ = input.shutdown().await;
        });

        let events = self.control.events.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(output).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(envelope) = Envelope::from_line(&line) {
                            let _ = events.send(Event::Frame(id, envelope));
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Error reading from worker {}: {}", id, e);
                        break;
                    }
                }
            }
            let _ = exited.await;
            let _ = events.send(Event::Exited(id));
        });

        self.pool.insert(id, line_tx, kill);
        tracing::debug!("Worker {} started", id);
    }

    fn on_frame(&mut self, id: WorkerId, envelope: Envelope) {
        match envelope {
            Envelope::Ready => self.on_ready(id),
            Envelope::Busy => {
                if let Some(slot) = self.pool.get_mut(id) {
                    slot.busy = true;
                }
            }
            Envelope::Done { busy } => self.on_done(id, busy),
            Envelope::Message { body } => match self.primary.parse(body) {
                Some(message) => self.handle(id, message),
                None => tracing::debug!("Dropping unrecognized message from worker {}", id),
            },
        }
    }

    fn on_ready(&mut self, id: WorkerId) {
        if self.pool.get(id).is_none() {
            return;
        }

        if self.stopping() {
            self.pool.close_input(id);
            return;
        }

        let Self { primary, pool, .. } = self;
        let mut ctx = Context::new(pool, Some(id));
        let result = primary.initialize_worker(id, &mut ctx);
        drain_local(primary, &mut ctx);
        drop(ctx);

        match result {
            Ok(()) => {
                if let Some(slot) = self.pool.get_mut(id) {
                    slot.initialized = true;
                }
                tracing::info!("Worker {} online", id);
                self.pull(id);
            }
            Err(e) => {
                tracing::error!("Error initializing worker {}: {}", id, e);
                self.pool.kill(id);
            }
        }
    }

    fn on_done(&mut self, id: WorkerId, busy: bool) {
        let Some(slot) = self.pool.get_mut(id) else {
            return;
        };
        slot.outstanding = slot.outstanding.saturating_sub(1);
        slot.busy = busy;

        if busy || self.stopping() {
            return;
        }

        if self.pool.open_count() > self.control.workers() {
            tracing::info!("Retiring worker {}", id);
            self.pool.close_input(id);
            return;
        }

        self.pull(id);

        // New discoveries may give starved workers something to do
        let starved: Vec<WorkerId> = self
            .pool
            .ids()
            .into_iter()
            .filter(|other| *other != id && self.pool.get(*other).map(|s| s.starved).unwrap_or(false))
            .collect();
        for other in starved {
            self.pull(other);
        }
    }

    fn handle(&mut self, id: WorkerId, message: P::Inbound) {
        let Self { primary, pool, .. } = self;
        let mut ctx = Context::new(pool, Some(id));
        if let Err(e) = primary.handle(message, &mut ctx) {
            tracing::error!("Error handling message from worker {}: {}", id, e);
        }
        drain_local(primary, &mut ctx);
    }

    /// Asks the primary for work for one worker until it gets some or the
    /// primary has nothing left
    fn pull(&mut self, id: WorkerId) {
        if self.stopping() {
            return;
        }

        let Self { primary, pool, .. } = self;
        match pool.get(id) {
            Some(slot) if slot.initialized && slot.is_open() && !slot.busy => {}
            _ => return,
        }

        let mut ctx = Context::new(pool, Some(id));
        let starved = loop {
            let next = primary.next(id, &mut ctx);
            drain_local(primary, &mut ctx);

            match next {
                Ok(Next::Work(message)) => {
                    ctx.send_to(id, message);
                    break false;
                }
                Ok(Next::Skip) => continue,
                Ok(Next::Stop) => break true,
                Err(e) => {
                    tracing::error!("Error dispatching next item to worker {}: {}", id, e);
                    break true;
                }
            }
        };
        drop(ctx);

        if let Some(slot) = self.pool.get_mut(id) {
            slot.starved = starved;
        }
    }

    /// Re-checks every idle worker for work and finishes when none is found
    fn sweep(&mut self) {
        for id in self.pool.ids() {
            self.pull(id);
        }

        if self.pool.is_idle() {
            tracing::info!("No more work, shutting down workers");
            self.finishing = true;
            self.pool.close_all();
        }
    }

    fn on_exit(&mut self, id: WorkerId) {
        let Some(slot) = self.pool.remove(id) else {
            return;
        };
        tracing::info!("Worker {} disconnected", id);
        self.primary.on_worker_exit(id);

        if self.stopping() {
            return;
        }

        if slot.initialized {
            self.spawn_up_to();
        } else {
            tracing::warn!("Worker {} exited before it was initialized", id);
            self.schedule_respawn();
        }
    }

    fn on_interrupt(&mut self) {
        if self.interrupted {
            tracing::warn!("Interrupted again, exiting immediately");
            std::process::exit(130);
        }

        tracing::info!(
            "Interrupted, waiting for {} workers to finish (interrupt again to force exit)",
            self.pool.len()
        );
        self.interrupted = true;
        self.pool.close_all();
    }
}

fn drain_local<P: Primary>(primary: &mut P, ctx: &mut Context<'_, P::Outbound, P::Inbound>) {
    while let Some(message) = ctx.take_local() {
        if let Err(e) = primary.handle(message, ctx) {
            tracing::error!("Error handling local message: {}", e);
        }
    }
}
