//! Graceful shutdown
//!
//! One controller owns the root cancellation token and tracks every
//! background loop (scheduler, validator, reloader, HTTP server).
//!
//! ## Usage
//!
//! ```ignore
//! let shutdown = ShutdownController::new(Duration::from_secs(300));
//!
//! shutdown.track("validator", validator.start(shutdown.token()));
//!
//! wait_for_shutdown_signal().await;
//! shutdown.shutdown().await;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Shutdown phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// Token cancelled, waiting for background tasks
    Draining,
    /// Shutdown complete, possibly after abandoning tasks
    Terminated,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Draining => write!(f, "Draining"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Coordinates cancellation and draining of background tasks
pub struct ShutdownController {
    cancel_token: CancellationToken,
    tasks: TaskTracker,
    phase: watch::Sender<ShutdownPhase>,
    initiated: AtomicBool,
    timeout: Duration,
}

impl ShutdownController {
    /// Create a controller that waits at most `timeout` for tasks
    #[must_use]
    pub fn new(timeout: Duration) -> Arc<Self> {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        Arc::new(Self {
            cancel_token: CancellationToken::new(),
            tasks: TaskTracker::new(),
            phase,
            initiated: AtomicBool::new(false),
            timeout,
        })
    }

    /// Cancellation token for a component
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    /// Whether shutdown has been initiated
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    /// Number of background tasks still running
    #[must_use]
    pub fn active_task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Run `future` as a tracked background task
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(async move {
            future.await;
            debug!(task = name, "Background task finished");
        });
    }

    /// Track an already spawned task until it finishes
    pub fn track<T: Send + 'static>(&self, name: &'static str, handle: JoinHandle<T>) {
        self.spawn(name, async move {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "Background task panicked");
            }
        });
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.send_replace(phase);
        info!(phase = %phase, "Shutdown phase changed");
    }

    /// Cancel every component and wait for tracked tasks
    ///
    /// Returns false when the timeout elapsed with tasks still running.
    /// Only the first call does anything.
    pub async fn shutdown(&self) -> bool {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Shutdown already initiated");
            return true;
        }

        info!("Initiating graceful shutdown...");
        self.set_phase(ShutdownPhase::Draining);
        self.cancel_token.cancel();
        self.tasks.close();

        let drained = match tokio::time::timeout(self.timeout, self.tasks.wait()).await {
            Ok(()) => {
                info!("All tasks completed gracefully");
                true
            }
            Err(_) => {
                warn!(
                    active_tasks = self.tasks.len(),
                    timeout_secs = self.timeout.as_secs(),
                    "Shutdown timeout exceeded, abandoning remaining tasks"
                );
                false
            }
        };

        self.set_phase(ShutdownPhase::Terminated);
        drained
    }
}

/// Wait for Ctrl+C or SIGTERM
///
/// A signal that cannot be installed is logged and never fires.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
