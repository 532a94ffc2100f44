//! Shutdown signalling for background loops.
//!
//! Key rotation and key-set refresh run as long-lived tasks; they select on a
//! [`ShutdownSignal`] so the process can stop them cleanly.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Owner of the shutdown signal and of the tasks that observe it.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    shutdown_tx: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl ShutdownCoordinator {
    /// Creates a new coordinator with no tasks.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: JoinSet::new(),
        }
    }

    /// Gets a signal that resolves once shutdown starts.
    #[must_use]
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: Some(self.shutdown_tx.subscribe()),
        }
    }

    /// Spawns a tracked task. The task is dropped when shutdown starts.
    pub fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.subscribe();
        self.tasks.spawn(async move {
            tokio::select! {
                () = future => info!(task = name, "Background task completed"),
                () = shutdown.recv() => info!(task = name, "Background task cancelled by shutdown"),
            }
        });
    }

    /// Signals shutdown and waits up to `timeout` for tracked tasks.
    pub async fn shutdown(mut self, timeout: Duration) {
        info!("Initiating graceful shutdown");
        let _ = self.shutdown_tx.send(true);

        let drained = tokio::time::timeout(timeout, async {
            while let Some(result) = self.tasks.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Task failed during shutdown");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("Shutdown timeout reached, aborting remaining tasks");
            self.tasks.abort_all();
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable receiver side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: Option<watch::Receiver<bool>>,
}

impl ShutdownSignal {
    /// A signal that never fires, for callers without a coordinator.
    #[must_use]
    pub const fn never() -> Self {
        Self { receiver: None }
    }

    /// Resolves when shutdown has been requested or the coordinator is gone.
    pub async fn recv(&mut self) {
        let Some(receiver) = self.receiver.as_mut() else {
            return std::future::pending().await;
        };
        while !*receiver.borrow() {
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }

    /// Whether shutdown has already been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.receiver.as_ref().is_some_and(|r| *r.borrow())
    }
}
