//! Process lifecycle: supervised tasks and graceful shutdown.
//!
//! A [`Supervisor`] owns every long-running task of a service (relays, the
//! HTTP server) and one broadcast shutdown channel. It runs until either:
//!
//! 1. a shutdown signal arrives (Ctrl+C / SIGTERM), or
//! 2. any task exits on its own (a fatal relay error, a server crash).
//!
//! Either way it broadcasts shutdown, waits up to the grace period for the
//! remaining tasks, aborts stragglers and reports the first failure so the
//! process can exit non-zero.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut supervisor = Supervisor::new(Duration::from_secs(10));
//! let relay = EventRelay::builder()
//!     // ...
//!     .shutdown(supervisor.shutdown_receiver())
//!     .build()?;
//! supervisor.spawn_relay(relay);
//!
//! supervisor.run(shutdown_signal()).await?;
//! ```

use crate::relay::EventRelay;
use event_relay_core::error::TypedError;
use event_relay_core::logging::log_error;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, info, warn};

/// Why a supervised service stopped abnormally.
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// A task returned an error
    #[error("Task '{task}' failed: {source}")]
    TaskFailed {
        /// Task name
        task: String,
        /// The task's error
        #[source]
        source: TypedError,
    },

    /// A task panicked
    #[error("Task '{task}' panicked: {reason}")]
    TaskPanicked {
        /// Task name
        task: String,
        /// Panic description
        reason: String,
    },
}

/// How a supervised task ended.
enum TaskOutcome {
    Completed,
    Failed(TypedError),
    Panicked(String),
}

type TaskResult = (String, TaskOutcome);

/// Owner of a service's background tasks.
pub struct Supervisor {
    shutdown_tx: broadcast::Sender<()>,
    tasks: JoinSet<TaskResult>,
    grace: Duration,
}

impl Supervisor {
    /// Create a supervisor with the given shutdown grace period.
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            tasks: JoinSet::new(),
            grace,
        }
    }

    /// A receiver that fires when shutdown begins.
    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Number of tasks still running.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task has been spawned (or all have finished).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Supervise a named task.
    pub fn spawn<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Future<Output = Result<(), TypedError>> + Send + 'static,
    {
        let name = name.into();
        info!(task = %name, "Starting supervised task");
        let supervised = async move {
            let outcome = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => TaskOutcome::Completed,
                Ok(Err(err)) => TaskOutcome::Failed(err),
                Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
            };
            (name, outcome)
        };
        self.tasks.spawn(supervised.in_current_span());
    }

    /// Supervise a relay.
    pub fn spawn_relay(&mut self, relay: EventRelay) {
        let name = relay.name().to_string();
        self.spawn(name, async move { relay.run().await.map_err(TypedError::from) });
    }

    /// Run until `signal` fires or a task exits, then shut everything down.
    ///
    /// # Errors
    ///
    /// Returns the first task failure (error or panic) observed before or
    /// during shutdown.
    pub async fn run<S>(mut self, signal: S) -> Result<(), SupervisorError>
    where
        S: Future<Output = ()>,
    {
        let mut failure: Option<SupervisorError> = None;

        tokio::select! {
            () = signal => {
                info!("Shutdown signal received");
            }
            Some(joined) = self.tasks.join_next() => {
                warn!("Supervised task exited before shutdown, stopping service");
                Self::record(joined, &mut failure);
            }
        }

        info!(tasks = self.tasks.len(), "Initiating graceful shutdown");
        // Receivers may all be gone already.
        let _ = self.shutdown_tx.send(());

        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(self.grace, async {
            while let Some(joined) = tasks.join_next().await {
                Self::record(joined, &mut failure);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = self.tasks.len(),
                grace = ?self.grace,
                "Shutdown grace period elapsed, aborting remaining tasks"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        match failure {
            Some(err) => Err(err),
            None => {
                info!("Graceful shutdown complete");
                Ok(())
            }
        }
    }

    fn record(joined: Result<TaskResult, JoinError>, failure: &mut Option<SupervisorError>) {
        let err = match joined {
            Ok((task, TaskOutcome::Completed)) => {
                info!(task = %task, "Task stopped gracefully");
                return;
            }
            Ok((task, TaskOutcome::Failed(source))) => {
                log_error(&format!("Task '{task}' failed"), &source);
                SupervisorError::TaskFailed { task, source }
            }
            Ok((task, TaskOutcome::Panicked(reason))) => {
                tracing::error!(task = %task, reason = %reason, "Task panicked");
                SupervisorError::TaskPanicked { task, reason }
            }
            Err(join_err) => {
                warn!(error = %join_err, "Task cancelled");
                return;
            }
        };
        if failure.is_none() {
            *failure = Some(err);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// Returns when the process receives SIGINT (Ctrl+C) or SIGTERM.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
