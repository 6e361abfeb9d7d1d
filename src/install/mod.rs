//! Installs the transfer endpoints as template releases.
//!
//! The source endpoint runs an SSH daemon behind a load-balanced service and
//! mounts the source volume; the destination endpoint mounts the destination
//! volume and runs the rsync job that pulls from the source. Every release the
//! installer creates, including ones left behind by a failed install, is
//! reported to a [`ReleaseTracker`] so it can be torn down later.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::cluster::{Cluster, ClusterError, InstalledRelease};
use crate::migration::{MigrationRun, Role};
use crate::values::{ReleaseValues, ValuesError};

/// Readiness wait applied to each release.
pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Receives every release created during a run.
pub trait ReleaseTracker: Send + Sync {
    /// Records that `release` exists and must be torn down.
    fn track(&self, release: InstalledRelease);
}

/// Errors raised while installing an endpoint.
#[derive(Debug, Error)]
pub enum InstallationError {
    /// Raised when the computed and user values cannot be merged.
    #[error("failed to build values for {role} release {release}: {source}")]
    Values {
        /// Role of the endpoint being installed.
        role: Role,
        /// Release name.
        release: String,
        /// Underlying value error.
        #[source]
        source: ValuesError,
    },
    /// Raised when the cluster rejects or times out the release.
    #[error("failed to install {role} release {release} in namespace {namespace}: {source}")]
    Apply {
        /// Role of the endpoint being installed.
        role: Role,
        /// Release name.
        release: String,
        /// Target namespace.
        namespace: String,
        /// Underlying cluster error.
        #[source]
        source: ClusterError,
    },
}

/// Installs source and destination endpoints against their clusters.
pub struct EndpointInstaller<'a, C: ?Sized, T: ?Sized> {
    cluster: &'a C,
    tracker: &'a T,
    wait_timeout: Duration,
}

impl<'a, C, T> EndpointInstaller<'a, C, T>
where
    C: Cluster + ?Sized,
    T: ReleaseTracker + ?Sized,
{
    /// Creates an installer that reports created releases to `tracker`.
    #[must_use]
    pub const fn new(cluster: &'a C, tracker: &'a T) -> Self {
        Self {
            cluster,
            tracker,
            wait_timeout: DEFAULT_INSTALL_TIMEOUT,
        }
    }

    /// Overrides the readiness wait.
    #[must_use]
    pub const fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    /// Installs the SSH daemon next to the source volume.
    ///
    /// # Errors
    ///
    /// Returns [`InstallationError`] when values cannot be built or the
    /// release does not become ready in time.
    pub async fn install_source(
        &self,
        run: &MigrationRun,
        public_key: &str,
    ) -> Result<InstalledRelease, InstallationError> {
        let source = run.source();
        let mut values = ReleaseValues::new();
        values
            .set_bool("sshd.enabled", true)
            .set("sshd.publicKey", public_key)
            .set("sshd.service.type", "LoadBalancer")
            .set("source.namespace", &source.namespace)
            .set("source.pvcName", &source.volume)
            .set_bool(
                "source.pvcMountReadOnly",
                run.options().source_mount_read_only,
            )
            .set("source.path", &source.path);

        self.install(run, Role::Source, &values).await
    }

    /// Installs the rsync job next to the destination volume, pointed at
    /// `peer_address` and authenticating with `private_key`.
    ///
    /// `peer_address` must already be host-formatted.
    ///
    /// # Errors
    ///
    /// Returns [`InstallationError`] when values cannot be built or the
    /// release does not become ready in time.
    pub async fn install_destination(
        &self,
        run: &MigrationRun,
        private_key: &str,
        private_key_mount_path: &str,
        peer_address: &str,
    ) -> Result<InstalledRelease, InstallationError> {
        let destination = run.destination();
        let options = run.options();
        let mut values = ReleaseValues::new();
        values
            .set_bool("rsync.enabled", true)
            .set_bool(
                "rsync.deleteExtraneousFiles",
                options.delete_extraneous_files,
            )
            .set_bool("rsync.noChown", options.no_chown)
            .set_bool("rsync.privateKeyMount", true)
            .set("rsync.privateKey", private_key)
            .set("rsync.privateKeyMountPath", private_key_mount_path)
            .set("rsync.sshRemoteHost", peer_address)
            .set("source.path", &run.source().path)
            .set("dest.namespace", &destination.namespace)
            .set("dest.pvcName", &destination.volume)
            .set("dest.path", &destination.path);

        self.install(run, Role::Destination, &values).await
    }

    async fn install(
        &self,
        run: &MigrationRun,
        role: Role,
        computed: &ReleaseValues,
    ) -> Result<InstalledRelease, InstallationError> {
        let endpoint = run.endpoint(role);
        let release = InstalledRelease::new(
            run.release_name(role),
            &endpoint.namespace,
            endpoint.cluster.clone(),
        );
        let values = computed.merged_with(&run.options().value_overrides);
        values
            .to_document()
            .map_err(|source| InstallationError::Values {
                role,
                release: release.name.clone(),
                source,
            })?;

        info!(%role, release = %release, "installing endpoint");
        match self
            .cluster
            .apply_release(&release, &values, self.wait_timeout)
            .await
        {
            Ok(()) => {
                self.tracker.track(release.clone());
                Ok(release)
            }
            Err(source) => {
                self.track_if_partially_created(&release).await;
                Err(InstallationError::Apply {
                    role,
                    release: release.name,
                    namespace: release.namespace,
                    source,
                })
            }
        }
    }

    async fn track_if_partially_created(&self, release: &InstalledRelease) {
        match self.cluster.release_exists(release).await {
            Ok(true) => {
                warn!(release = %release, "install failed after creating resources");
                self.tracker.track(release.clone());
            }
            Ok(false) => {}
            Err(err) => {
                // Uninstall tolerates missing releases.
                warn!(release = %release, error = %err, "could not check failed release");
                self.tracker.track(release.clone());
            }
        }
    }
}
