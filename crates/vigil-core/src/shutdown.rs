//! Graceful shutdown coordination.
//!
//! Sequence on shutdown: run cleanup callbacks, cancel the shared token so
//! pools stop taking new work, wait for tracked tasks up to the grace
//! period, then report whatever is still running.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;
use tracing::Instrument;

use crate::error::AppError;

type CleanupFn = Box<dyn FnOnce() -> Result<(), AppError> + Send>;

/// What happened during a shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub cleanups_run: usize,
    pub cleanups_failed: usize,
    /// Tasks still running when the grace period ran out.
    pub stragglers: usize,
}

struct Inner {
    token: CancellationToken,
    tracker: TaskTracker,
    cleanups: Mutex<Vec<(String, CleanupFn)>>,
    in_progress: AtomicBool,
    grace_period: Duration,
}

/// Registry of running work and cleanup callbacks, shared by cloning.
#[derive(Clone)]
pub struct ShutdownSupervisor {
    inner: Arc<Inner>,
}

impl ShutdownSupervisor {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                tracker: TaskTracker::new(),
                cleanups: Mutex::new(Vec::new()),
                in_progress: AtomicBool::new(false),
                grace_period,
            }),
        }
    }

    /// Token cancelled when shutdown starts. Pools watch it to stop
    /// accepting work.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub fn grace_period(&self) -> Duration {
        self.inner.grace_period
    }

    /// Number of tracked tasks still running.
    pub fn active_tasks(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Register a callback run once at the start of shutdown.
    pub fn register_cleanup(
        &self,
        name: impl Into<String>,
        cleanup: impl FnOnce() -> Result<(), AppError> + Send + 'static,
    ) {
        self.lock_cleanups().push((name.into(), Box::new(cleanup)));
    }

    /// Spawn a tracked task; shutdown waits for it within the grace period.
    pub fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let span = tracing::info_span!("task", task = %name);
        self.inner.tracker.spawn(future.instrument(span))
    }

    /// Wrap a future so shutdown accounts for it, for callers that spawn
    /// through their own `JoinSet`.
    pub fn track<F: Future>(&self, future: F) -> TrackedFuture<F> {
        self.inner.tracker.track_future(future)
    }

    /// Install Ctrl-C / SIGTERM handling that triggers [`initiate_shutdown`].
    ///
    /// The listener exits quietly if shutdown starts some other way.
    ///
    /// [`initiate_shutdown`]: Self::initiate_shutdown
    pub fn install_signal_handlers(&self) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let token = supervisor.token();
            tokio::select! {
                () = termination_signal() => {
                    tracing::info!("Termination signal received");
                    supervisor.initiate_shutdown().await;
                }
                () = token.cancelled() => {}
            }
        })
    }

    /// Run the shutdown sequence. Returns `None` if a shutdown is already
    /// in progress.
    pub async fn initiate_shutdown(&self) -> Option<ShutdownReport> {
        if self.inner.in_progress.swap(true, Ordering::SeqCst) {
            tracing::debug!("Shutdown already in progress");
            return None;
        }

        tracing::info!("Initiating graceful shutdown");
        let mut report = ShutdownReport::default();

        let cleanups = std::mem::take(&mut *self.lock_cleanups());
        for (name, cleanup) in cleanups {
            report.cleanups_run += 1;
            if let Err(e) = cleanup() {
                report.cleanups_failed += 1;
                tracing::error!(cleanup = %name, error = %e, "Cleanup callback failed");
            }
        }

        self.inner.token.cancel();
        self.inner.tracker.close();

        if tokio::time::timeout(self.inner.grace_period, self.inner.tracker.wait())
            .await
            .is_err()
        {
            report.stragglers = self.inner.tracker.len();
            tracing::warn!(
                stragglers = report.stragglers,
                grace_secs = self.inner.grace_period.as_secs_f64(),
                "Tasks still running after grace period"
            );
        } else {
            tracing::info!("All tasks finished");
        }

        Some(report)
    }

    fn lock_cleanups(&self) -> std::sync::MutexGuard<'_, Vec<(String, CleanupFn)>> {
        self.inner.cleanups.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }
}

async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
