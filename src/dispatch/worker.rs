use super::Envelope;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// The worker side of a process pool
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Messages received from the primary
    type Inbound: Send + 'static;
    /// Messages sent to the primary
    type Outbound: Serialize + Send + 'static;

    /// Decodes a primary message; unknown messages yield `None` and are dropped
    fn parse(&self, value: Value) -> Option<Self::Inbound>;

    /// A barrier message is handled to completion before the next line is read
    fn is_barrier(&self, _message: &Self::Inbound) -> bool {
        false
    }

    /// Whether this many concurrent handlers means the worker is full
    fn is_busy(&self, in_flight: usize) -> bool;

    /// Handles one message; failures should be reported through `outbox`
    async fn handle(&self, message: Self::Inbound, outbox: Outbox<Self::Outbound>) -> crate::Result<()>;
}

/// Sends messages from a worker handler to the primary
pub struct Outbox<M> {
    tx: mpsc::UnboundedSender<Envelope>,
    _message: PhantomData<fn(M)>,
}

impl<M> Clone for Outbox<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            _message: PhantomData,
        }
    }
}

impl<M: Serialize> Outbox<M> {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            tx,
            _message: PhantomData,
        }
    }

    /// Queues a message; delivery order matches send order
    pub fn send(&self, message: M) {
        match Envelope::message(&message) {
            Ok(envelope) => {
                if self.tx.send(envelope).is_err() {
                    tracing::debug!("Primary connection closed, dropping message");
                }
            }
            Err(e) => tracing::error!("Failed to encode message for primary: {}", e),
        }
    }
}

/// Runs a worker over a pair of pipes until its input reaches EOF
///
/// Sends `ready` first, then handles each inbound message on its own task.
/// After every handler finishes a `done` line reports whether the worker is
/// still busy. On EOF the remaining handlers are awaited before returning.
pub async fn serve<W, R, T>(worker: Arc<W>, input: R, output: T) -> crate::Result<()>
where
    W: Worker,
    R: AsyncRead + Unpin + Send,
    T: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<Envelope>();
    let writer = tokio::spawn(write_envelopes(output, rx));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let mut handlers = JoinSet::new();
    let mut lines = BufReader::new(input).lines();

    let _ = tx.send(Envelope::Ready);

    loop {
        tokio::select! {
            Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("Handler task failed: {}", e);
                    let remaining = in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
                    let _ = tx.send(Envelope::Done { busy: worker.is_busy(remaining) });
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let Some(Envelope::Message { body }) = Envelope::from_line(&line) else {
                    continue;
                };

                let Some(message) = worker.parse(body) else {
                    tracing::debug!("Dropping unrecognized message");
                    let busy = worker.is_busy(in_flight.load(Ordering::SeqCst));
                    let _ = tx.send(Envelope::Done { busy });
                    continue;
                };

                let barrier = worker.is_barrier(&message);
                let count = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                if worker.is_busy(count) {
                    let _ = tx.send(Envelope::Busy);
                }

                let task = handle_one(worker.clone(), message, tx.clone(), in_flight.clone());
                if barrier {
                    task.await;
                } else {
                    handlers.spawn(task);
                }
            }
        }
    }

    tracing::debug!("Input closed, waiting for {} handlers", handlers.len());
    while let Some(joined) = handlers.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Handler task failed: {}", e);
        }
    }

    drop(tx);
    match writer.await {
        Ok(result) => result.map_err(crate::SpiderError::from),
        Err(e) => {
            tracing::error!("Output task failed: {}", e);
            Ok(())
        }
    }
}

async fn handle_one<W: Worker>(
    worker: Arc<W>,
    message: W::Inbound,
    tx: mpsc::UnboundedSender<Envelope>,
    in_flight: Arc<AtomicUsize>,
) {
    if let Err(e) = worker.handle(message, Outbox::new(tx.clone())).await {
        tracing::error!("Worker handler failed: {}", e);
    }

    let remaining = in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
    let _ = tx.send(Envelope::Done {
        busy: worker.is_busy(remaining),
    });
}

async fn write_envelopes<T>(mut output: T, mut rx: mpsc::UnboundedReceiver<Envelope>) -> std::io::Result<()>
where
    T: AsyncWrite + Unpin,
{
    while let Some(envelope) = rx.recv().await {
        match envelope.to_line() {
            Ok(line) => {
                output.write_all(line.as_bytes()).await?;
                output.flush().await?;
            }
            Err(e) => tracing::error!("Failed to encode envelope: {}", e),
        }
    }
    output.shutdown().await
}
