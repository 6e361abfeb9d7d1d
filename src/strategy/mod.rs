//! Strategy execution: provisions the transfer endpoints for one network
//! topology, drives the transfer and guarantees teardown.
//!
//! [`LoadBalancerStrategy`] exposes the source volume through an SSH daemon
//! behind a load-balanced service and lets the destination's rsync job pull
//! from it. The sequence is strictly linear because the destination needs the
//! source's resolved address. Cleanup is registered before the first release
//! is created and runs on every exit path, panics included.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::address::{
    AddressResolutionError, AddressResolver, DEFAULT_POLL_INTERVAL, DEFAULT_RESOLVE_TIMEOUT,
    format_host,
};
use crate::cleanup::CleanupCoordinator;
use crate::cluster::Cluster;
use crate::install::{DEFAULT_INSTALL_TIMEOUT, EndpointInstaller, InstallationError};
use crate::keys::{KeyGenerationError, KeyPair, create_key_pair};
use crate::migration::MigrationRun;
use crate::monitor::{DEFAULT_JOB_POLL_INTERVAL, JobError, JobMonitor};

/// Future returned by [`Strategy::execute`].
pub type StrategyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), StrategyError>> + Send + 'a>>;

/// Errors surfaced by a strategy run.
///
/// Use [`Retryable::is_retryable`] to decide whether another network topology
/// is worth attempting.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// The key pair could not be generated.
    #[error(transparent)]
    KeyGeneration(#[from] KeyGenerationError),
    /// An endpoint could not be installed.
    #[error(transparent)]
    Installation(#[from] InstallationError),
    /// The source endpoint never received an external address.
    #[error(transparent)]
    AddressResolution(#[from] AddressResolutionError),
    /// The transfer job failed or could not be observed.
    #[error(transparent)]
    Job(#[from] JobError),
    /// The run was cancelled before it finished.
    #[error("migration cancelled")]
    Cancelled,
}

/// Classifies failures for the strategy-selection policy.
pub trait Retryable {
    /// Returns `true` when a different strategy may succeed where this one
    /// failed.
    fn is_retryable(&self) -> bool;
}

impl Retryable for StrategyError {
    fn is_retryable(&self) -> bool {
        // Job failures stay retryable alongside provisioning failures.
        !matches!(self, Self::Cancelled)
    }
}

/// A network-topology approach to connecting the two endpoints.
pub trait Strategy: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Runs the migration once, tearing down everything it created before
    /// returning.
    fn execute<'a>(
        &'a self,
        run: &'a MigrationRun,
        cancel: &'a CancellationToken,
    ) -> StrategyFuture<'a>;
}

/// Timeouts and poll intervals used by [`LoadBalancerStrategy`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StrategySettings {
    /// Readiness wait for each endpoint release.
    pub install_timeout: Duration,
    /// Delay between service address lookups.
    pub address_poll_interval: Duration,
    /// Deadline for the service address.
    pub address_timeout: Duration,
    /// Delay between job phase lookups.
    pub job_poll_interval: Duration,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            install_timeout: DEFAULT_INSTALL_TIMEOUT,
            address_poll_interval: DEFAULT_POLL_INTERVAL,
            address_timeout: DEFAULT_RESOLVE_TIMEOUT,
            job_poll_interval: DEFAULT_JOB_POLL_INTERVAL,
        }
    }
}

/// Connects the endpoints through a load-balanced service in front of the
/// source's SSH daemon.
pub struct LoadBalancerStrategy<C: Cluster + ?Sized + 'static> {
    cluster: Arc<C>,
    settings: StrategySettings,
}

impl<C: Cluster + ?Sized + 'static> LoadBalancerStrategy<C> {
    /// Creates the strategy with default settings.
    #[must_use]
    pub fn new(cluster: Arc<C>) -> Self {
        Self {
            cluster,
            settings: StrategySettings::default(),
        }
    }

    /// Replaces all timeouts and intervals.
    #[must_use]
    pub const fn with_settings(mut self, settings: StrategySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Current settings.
    #[must_use]
    pub const fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    async fn run_migration(
        &self,
        run: &MigrationRun,
        cancel: &CancellationToken,
    ) -> Result<(), StrategyError> {
        let algorithm = run.options().key_algorithm;
        info!(run_id = %run.id(), %algorithm, "generating key pair");
        let keys = create_key_pair(algorithm)?;

        let coordinator = CleanupCoordinator::register(Arc::clone(&self.cluster), cancel.clone());
        let outcome = AssertUnwindSafe(self.provision_and_transfer(run, &keys, &coordinator, cancel))
            .catch_unwind()
            .await;

        let report = coordinator.signal_and_wait().await;
        if !report.is_clean() {
            warn!(
                run_id = %run.id(),
                failed = report.failures.len(),
                "some releases could not be removed"
            );
        }

        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    async fn provision_and_transfer(
        &self,
        run: &MigrationRun,
        keys: &KeyPair,
        coordinator: &CleanupCoordinator<C>,
        cancel: &CancellationToken,
    ) -> Result<(), StrategyError> {
        let cluster = &*self.cluster;
        let installer = EndpointInstaller::new(cluster, coordinator)
            .with_wait_timeout(self.settings.install_timeout);

        installer.install_source(run, keys.public_key()).await?;
        ensure_active(cancel)?;

        let source = run.source();
        let service = run.source_service_name();
        let resolver = AddressResolver::new(cluster)
            .with_poll_interval(self.settings.address_poll_interval)
            .with_timeout(self.settings.address_timeout);
        let address = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(StrategyError::Cancelled),
            resolved = resolver.resolve(&source.cluster, &source.namespace, &service) => resolved?,
        };
        let host = format_host(&address);
        ensure_active(cancel)?;

        installer
            .install_destination(
                run,
                keys.private_key(),
                &keys.private_key_mount_path(),
                &host,
            )
            .await?;
        ensure_active(cancel)?;

        let destination = run.destination();
        let job = run.transfer_job_name();
        let monitor = JobMonitor::new(cluster)
            .with_poll_interval(self.settings.job_poll_interval)
            .show_progress(run.options().show_progress);
        info!(run_id = %run.id(), %job, "waiting for transfer job");
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(StrategyError::Cancelled),
            finished = monitor.wait_for_job_completion(
                &destination.cluster,
                &destination.namespace,
                &job,
            ) => finished.map_err(StrategyError::from),
        }
    }
}

impl<C: Cluster + ?Sized + 'static> Strategy for LoadBalancerStrategy<C> {
    fn name(&self) -> &'static str {
        "lbsvc"
    }

    fn execute<'a>(
        &'a self,
        run: &'a MigrationRun,
        cancel: &'a CancellationToken,
    ) -> StrategyFuture<'a> {
        Box::pin(async move {
            info!(strategy = self.name(), run_id = %run.id(), "starting migration");
            let result = self.run_migration(run, cancel).await;
            match &result {
                Ok(()) => info!(strategy = self.name(), run_id = %run.id(), "migration finished"),
                Err(err) => warn!(
                    strategy = self.name(),
                    run_id = %run.id(),
                    error = %err,
                    retryable = err.is_retryable(),
                    "migration failed"
                ),
            }
            result
        })
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), StrategyError> {
    if cancel.is_cancelled() {
        Err(StrategyError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests;
