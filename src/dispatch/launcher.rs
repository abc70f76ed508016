//! Starting workers as child processes or as in-process tasks

use super::{serve, DispatchError, Worker, WorkerId};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{duplex, AsyncRead, AsyncWrite};
use tokio::process::Command;
use tokio::sync::oneshot;

/// Size of each in-memory pipe used by in-process workers
const PIPE_CAPACITY: usize = 256 * 1024;

/// The primary's end of a running worker
pub struct WorkerLink {
    /// Worker stdin
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
    /// Worker stdout
    pub output: Box<dyn AsyncRead + Send + Unpin>,
    /// Resolves (or errors) once the worker has exited
    pub exited: oneshot::Receiver<()>,
    /// Terminates the worker immediately
    pub kill: oneshot::Sender<()>,
}

/// Starts new workers
pub trait Launcher {
    fn launch(&self, id: WorkerId) -> Result<WorkerLink, DispatchError>;
}

/// Runs each worker as a child process talking over stdin/stdout
///
/// Worker stderr is inherited so worker logs land next to the primary's.
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-runs the current executable with the given arguments
    pub fn current_exe(args: Vec<String>) -> Result<Self, DispatchError> {
        let program = std::env::current_exe().map_err(DispatchError::CurrentExe)?;
        Ok(Self::new(program, args))
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, id: WorkerId) -> Result<WorkerLink, DispatchError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(DispatchError::Spawn)?;

        let input = child
            .stdin
            .take()
            .ok_or(DispatchError::MissingPipe(id, "stdin"))?;
        let output = child
            .stdout
            .take()
            .ok_or(DispatchError::MissingPipe(id, "stdout"))?;

        tracing::debug!("Spawned worker {} (pid {:?})", id, child.id());

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(async move {
            let killed = tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) if !status.success() => {
                            tracing::warn!("Worker {} exited with {}", id, status);
                        }
                        Ok(_) => tracing::debug!("Worker {} exited", id),
                        Err(e) => tracing::error!("Failed to wait for worker {}: {}", id, e),
                    }
                    false
                }
                Ok(()) = kill_rx => true,
            };

            if killed {
                tracing::warn!("Killing worker {}", id);
                if let Err(e) = child.kill().await {
                    tracing::error!("Failed to kill worker {}: {}", id, e);
                }
            }
            let _ = exit_tx.send(());
        });

        Ok(WorkerLink {
            input: Box::new(input),
            output: Box::new(output),
            exited: exit_rx,
            kill: kill_tx,
        })
    }
}

/// Runs each worker as a tokio task over in-memory pipes
///
/// Behaves like a child process from the primary's point of view; used in
/// tests and for single-process debugging.
pub struct InProcessLauncher<W> {
    factory: Arc<dyn Fn() -> W + Send + Sync>,
}

impl<W: Worker> InProcessLauncher<W> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> W + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
        }
    }
}

impl<W: Worker> Launcher for InProcessLauncher<W> {
    fn launch(&self, id: WorkerId) -> Result<WorkerLink, DispatchError> {
        let (primary_in, worker_in) = duplex(PIPE_CAPACITY);
        let (worker_out, primary_out) = duplex(PIPE_CAPACITY);
        let worker = Arc::new((self.factory)());

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(async move {
            tokio::select! {
                result = serve(worker, worker_in, worker_out) => {
                    if let Err(e) = result {
                        tracing::error!("In-process worker {} failed: {}", id, e);
                    }
                }
                Ok(()) = kill_rx => tracing::warn!("Killing in-process worker {}", id),
            }
            let _ = exit_tx.send(());
        });

        Ok(WorkerLink {
            input: Box::new(primary_in),
            output: Box::new(primary_out),
            exited: exit_rx,
            kill: kill_tx,
        })
    }
}
