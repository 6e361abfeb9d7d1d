//! Cluster control-plane abstraction.
//!
//! The strategy never talks to a cluster directly; every create, inspect and
//! delete goes through [`Cluster`], which keeps the orchestration testable
//! with in-memory doubles and lets the production client shell out to the
//! chart and cluster tooling.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

use crate::migration::ClusterTarget;
use crate::values::{ReleaseValues, ValuesError};

mod command;
mod runner;

pub use command::{CommandCluster, DEFAULT_HELM_BIN, DEFAULT_KUBECTL_BIN};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner};

/// Identity of an applied template instance.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct InstalledRelease {
    /// Release name.
    pub name: String,
    /// Namespace the release was installed into.
    pub namespace: String,
    /// Cluster hosting the release.
    pub cluster: ClusterTarget,
}

impl InstalledRelease {
    /// Creates a release identity.
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, cluster: ClusterTarget) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            cluster,
        }
    }
}

impl fmt::Display for InstalledRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} on {}", self.namespace, self.name, self.cluster)
    }
}

/// Observed state of a transfer job.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum JobPhase {
    /// Created but no pod is running yet.
    Pending,
    /// At least one pod is active.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Gave up after exhausting retries.
    Failed,
}

impl JobPhase {
    /// Returns `true` for [`JobPhase::Succeeded`] and [`JobPhase::Failed`].
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Errors raised by cluster clients.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClusterError {
    /// Raised when the requested object does not exist.
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Object kind (for example `job`).
        kind: String,
        /// Namespace searched.
        namespace: String,
        /// Object name.
        name: String,
    },
    /// Raised when a tool cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a tool exits with a non-zero status.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed.
        program: String,
        /// Exit status reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when tool output cannot be parsed.
    #[error("failed to parse {resource} output: {message}")]
    Parse {
        /// Resource being parsed.
        resource: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when template values cannot be rendered.
    #[error("failed to render template values: {0}")]
    Values(#[from] ValuesError),
}

/// Future returned by cluster operations.
pub type ClusterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClusterError>> + Send + 'a>>;

/// Control-plane operations the migration needs from a cluster.
pub trait Cluster: Send + Sync {
    /// Renders the template with `values` and installs it as `release`,
    /// waiting up to `wait_timeout` for the release's readiness gate.
    fn apply_release<'a>(
        &'a self,
        release: &'a InstalledRelease,
        values: &'a ReleaseValues,
        wait_timeout: Duration,
    ) -> ClusterFuture<'a, ()>;

    /// Reports whether `release` exists, including partially applied ones.
    fn release_exists<'a>(&'a self, release: &'a InstalledRelease) -> ClusterFuture<'a, bool>;

    /// Returns the external address of a load-balanced service, or `None`
    /// while the address has not been assigned.
    fn service_external_address<'a>(
        &'a self,
        target: &'a ClusterTarget,
        namespace: &'a str,
        service: &'a str,
    ) -> ClusterFuture<'a, Option<String>>;

    /// Returns the current phase of a job.
    fn job_phase<'a>(
        &'a self,
        target: &'a ClusterTarget,
        namespace: &'a str,
        job: &'a str,
    ) -> ClusterFuture<'a, JobPhase>;

    /// Returns the latest log line emitted by a job's pod, if any.
    fn job_log_tail<'a>(
        &'a self,
        target: &'a ClusterTarget,
        namespace: &'a str,
        job: &'a str,
    ) -> ClusterFuture<'a, Option<String>>;

    /// Removes `release` and every resource it owns.
    fn uninstall<'a>(&'a self, release: &'a InstalledRelease) -> ClusterFuture<'a, ()>;
}
