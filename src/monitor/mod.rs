//! Waits for the transfer job to reach a terminal phase.
//!
//! The job is observed by polling its phase on the destination cluster. While
//! the job runs, the latest log line is parsed for rsync progress and shown on
//! a progress bar; progress lookups never affect the wait itself.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::cluster::{Cluster, ClusterError, JobPhase};
use crate::migration::ClusterTarget;

mod progress;

pub use progress::{ProgressReporter, TransferProgress, parse_rsync_progress};

/// Default delay between job phase lookups.
pub const DEFAULT_JOB_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Consecutive lookup errors tolerated before the watch is abandoned.
pub const MAX_CONSECUTIVE_WATCH_ERRORS: u32 = 3;

/// Errors raised while waiting for the transfer job.
#[derive(Debug, Error)]
pub enum JobError {
    /// Raised when the job reports the `Failed` phase.
    #[error("transfer job {namespace}/{job} failed")]
    Failed {
        /// Namespace of the job.
        namespace: String,
        /// Job name.
        job: String,
    },
    /// Raised when the job can no longer be observed.
    #[error("lost track of transfer job {namespace}/{job}: {source}")]
    Watch {
        /// Namespace of the job.
        namespace: String,
        /// Job name.
        job: String,
        /// Last lookup error.
        #[source]
        source: ClusterError,
    },
}

/// Polls a job until it succeeds or fails.
#[derive(Debug)]
pub struct JobMonitor<'a, C: ?Sized> {
    cluster: &'a C,
    poll_interval: Duration,
    show_progress: bool,
}

impl<'a, C: Cluster + ?Sized> JobMonitor<'a, C> {
    /// Creates a monitor with the default interval and progress disabled.
    #[must_use]
    pub const fn new(cluster: &'a C) -> Self {
        Self {
            cluster,
            poll_interval: DEFAULT_JOB_POLL_INTERVAL,
            show_progress: false,
        }
    }

    /// Overrides the delay between lookups.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Enables or disables the progress bar.
    #[must_use]
    pub const fn show_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Blocks until `job` in `namespace` reaches `Succeeded` or `Failed`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Failed`] when the job fails, and
    /// [`JobError::Watch`] when the job disappears or more than
    /// [`MAX_CONSECUTIVE_WATCH_ERRORS`] lookups fail in a row.
    pub async fn wait_for_job_completion(
        &self,
        target: &ClusterTarget,
        namespace: &str,
        job: &str,
    ) -> Result<(), JobError> {
        let reporter = ProgressReporter::new(self.show_progress);
        let mut consecutive_errors = 0;

        loop {
            match self.cluster.job_phase(target, namespace, job).await {
                Ok(phase) if phase.is_terminal() => {
                    return finish(&reporter, namespace, job, phase);
                }
                Ok(phase) => {
                    consecutive_errors = 0;
                    debug!(namespace, job, %phase, "transfer job not finished");
                    if self.show_progress && phase == JobPhase::Running {
                        self.report_progress(&reporter, target, namespace, job)
                            .await;
                    }
                }
                Err(source) => {
                    consecutive_errors += 1;
                    if matches!(source, ClusterError::NotFound { .. })
                        || consecutive_errors > MAX_CONSECUTIVE_WATCH_ERRORS
                    {
                        reporter.finish_error();
                        return Err(JobError::Watch {
                            namespace: namespace.to_owned(),
                            job: job.to_owned(),
                            source,
                        });
                    }
                    warn!(namespace, job, error = %source, "transfer job lookup failed");
                }
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn report_progress(
        &self,
        reporter: &ProgressReporter,
        target: &ClusterTarget,
        namespace: &str,
        job: &str,
    ) {
        match self.cluster.job_log_tail(target, namespace, job).await {
            Ok(Some(line)) => {
                if let Some(progress) = parse_rsync_progress(&line) {
                    reporter.update(progress);
                }
            }
            Ok(None) => {}
            Err(err) => debug!(namespace, job, error = %err, "could not read job logs"),
        }
    }
}

fn finish(
    reporter: &ProgressReporter,
    namespace: &str,
    job: &str,
    phase: JobPhase,
) -> Result<(), JobError> {
    if phase == JobPhase::Succeeded {
        reporter.finish_success();
        info!(namespace, job, "transfer job succeeded");
        Ok(())
    } else {
        reporter.finish_error();
        Err(JobError::Failed {
            namespace: namespace.to_owned(),
            job: job.to_owned(),
        })
    }
}
