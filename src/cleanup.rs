//! Guarantees teardown of every release created during a run.
//!
//! The coordinator is registered before the first resource is created. It
//! records releases as the installer reports them and tears them down either
//! when the run finishes ([`CleanupCoordinator::signal_and_wait`]), when the
//! run's cancellation token fires, or when the coordinator is dropped without
//! being finished. Teardown drains the tracked set under a lock, so each
//! release is uninstalled at most once whichever path gets there first.

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::{Cluster, ClusterError, InstalledRelease};
use crate::install::ReleaseTracker;

/// A release that could not be uninstalled. Logged, never escalated.
#[derive(Debug, Error)]
#[error("failed to uninstall release {release}: {source}")]
pub struct CleanupError {
    /// Release that was left behind.
    pub release: InstalledRelease,
    /// Underlying cluster error.
    #[source]
    pub source: ClusterError,
}

/// Outcome of tearing down a run's releases.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Releases uninstalled successfully, in teardown order.
    pub released: Vec<InstalledRelease>,
    /// Releases whose uninstall failed.
    pub failures: Vec<CleanupError>,
}

impl CleanupReport {
    /// Returns `true` when every tracked release was uninstalled.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of uninstall attempts made.
    #[must_use]
    pub const fn attempted(&self) -> usize {
        self.released.len() + self.failures.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct CleanupState<C: ?Sized> {
    cluster: Arc<C>,
    tracked: Mutex<Vec<InstalledRelease>>,
    report: Mutex<CleanupReport>,
}

impl<C: Cluster + ?Sized> CleanupState<C> {
    async fn teardown(&self) {
        let releases = mem::take(&mut *lock(&self.tracked));
        for release in releases.into_iter().rev() {
            info!(release = %release, "uninstalling release");
            match self.cluster.uninstall(&release).await {
                Ok(()) => lock(&self.report).released.push(release),
                Err(source) => {
                    let err = CleanupError { release, source };
                    warn!(error = %err, "cleanup failed");
                    lock(&self.report).failures.push(err);
                }
            }
        }
    }
}

/// Tracks releases for one run and tears them down exactly once.
pub struct CleanupCoordinator<C: Cluster + ?Sized + 'static> {
    state: Arc<CleanupState<C>>,
    stop: CancellationToken,
    watcher: Option<JoinHandle<()>>,
}

impl<C: Cluster + ?Sized + 'static> CleanupCoordinator<C> {
    /// Starts tracking a run and arms teardown on `cancel`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn register(cluster: Arc<C>, cancel: CancellationToken) -> Self {
        let state = Arc::new(CleanupState {
            cluster,
            tracked: Mutex::new(Vec::new()),
            report: Mutex::new(CleanupReport::default()),
        });
        let stop = CancellationToken::new();

        let watcher_state = Arc::clone(&state);
        let watcher_stop = stop.clone();
        let watcher = tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("cancellation requested, tearing down releases");
                    watcher_state.teardown().await;
                }
                () = watcher_stop.cancelled() => {
                    debug!("cleanup watcher stopped");
                }
            }
        });

        Self {
            state,
            stop,
            watcher: Some(watcher),
        }
    }

    /// Releases tracked and not yet torn down.
    #[must_use]
    pub fn pending(&self) -> Vec<InstalledRelease> {
        lock(&self.state.tracked).clone()
    }

    /// Stops the watcher and uninstalls everything still tracked.
    ///
    /// Individual uninstall failures are logged and collected in the report;
    /// they never stop the remaining teardown.
    pub async fn signal_and_wait(mut self) -> CleanupReport {
        self.stop.cancel();
        if let Some(watcher) = self.watcher.take()
            && let Err(err) = watcher.await
        {
            warn!(error = %err, "cleanup watcher did not finish cleanly");
        }
        self.state.teardown().await;

        let report = mem::take(&mut *lock(&self.state.report));
        info!(
            released = report.released.len(),
            failed = report.failures.len(),
            "cleanup finished"
        );
        report
    }
}

impl<C: Cluster + ?Sized + 'static> ReleaseTracker for CleanupCoordinator<C> {
    fn track(&self, release: InstalledRelease) {
        debug!(release = %release, "tracking release");
        lock(&self.state.tracked).push(release);
    }
}

impl<C: Cluster + ?Sized + 'static> Drop for CleanupCoordinator<C> {
    fn drop(&mut self) {
        // `signal_and_wait` already ran.
        if self.watcher.is_none() {
            return;
        }
        self.stop.cancel();
        if lock(&self.state.tracked).is_empty() {
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                warn!("run abandoned, tearing down releases in the background");
                let state = Arc::clone(&self.state);
                drop(handle.spawn(async move { state.teardown().await }));
            }
            Err(_) => warn!(
                pending = lock(&self.state.tracked).len(),
                "run abandoned outside a runtime, releases left behind"
            ),
        }
    }
}
