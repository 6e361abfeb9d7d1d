//! Cluster client that shells out to `helm` and `kubectl`.
//!
//! Template values are piped to `helm` over stdin so key material never lands
//! on disk. Object inspection uses `kubectl ... -o json` and parses only the
//! status fields the migration needs.

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::migration::ClusterTarget;
use crate::values::ReleaseValues;

use super::runner::{CommandOutput, CommandRunner, ProcessCommandRunner};
use super::{Cluster, ClusterError, ClusterFuture, InstalledRelease, JobPhase};

/// Default `helm` executable.
pub const DEFAULT_HELM_BIN: &str = "helm";

/// Default `kubectl` executable.
pub const DEFAULT_KUBECTL_BIN: &str = "kubectl";

/// [`Cluster`] implementation backed by the `helm` and `kubectl` CLIs.
#[derive(Debug)]
pub struct CommandCluster<R: CommandRunner> {
    runner: Arc<R>,
    chart: String,
    chart_version: Option<String>,
    helm_bin: String,
    kubectl_bin: String,
}

impl CommandCluster<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    #[must_use]
    pub fn with_process_runner(chart: impl Into<String>) -> Self {
        Self::new(ProcessCommandRunner, chart)
    }
}

impl<R: CommandRunner + 'static> CommandCluster<R> {
    /// Creates a client installing `chart` through `runner`.
    #[must_use]
    pub fn new(runner: R, chart: impl Into<String>) -> Self {
        Self {
            runner: Arc::new(runner),
            chart: chart.into(),
            chart_version: None,
            helm_bin: DEFAULT_HELM_BIN.to_owned(),
            kubectl_bin: DEFAULT_KUBECTL_BIN.to_owned(),
        }
    }

    /// Pins the chart version passed to `helm install`.
    #[must_use]
    pub fn with_chart_version(mut self, version: Option<String>) -> Self {
        self.chart_version = version;
        self
    }

    /// Overrides the `helm` executable.
    #[must_use]
    pub fn with_helm_bin(mut self, helm_bin: impl Into<String>) -> Self {
        self.helm_bin = helm_bin.into();
        self
    }

    /// Overrides the `kubectl` executable.
    #[must_use]
    pub fn with_kubectl_bin(mut self, kubectl_bin: impl Into<String>) -> Self {
        self.kubectl_bin = kubectl_bin.into();
        self
    }

    async fn exec(
        &self,
        program: &str,
        args: Vec<OsString>,
        stdin: Option<String>,
    ) -> Result<CommandOutput, ClusterError> {
        debug!(program, args = ?args, "running cluster command");
        let runner = Arc::clone(&self.runner);
        let owned_program = program.to_owned();
        tokio::task::spawn_blocking(move || runner.run(&owned_program, &args, stdin.as_deref()))
            .await
            .map_err(|err| ClusterError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?
    }

    fn failure(program: &str, output: CommandOutput) -> ClusterError {
        ClusterError::CommandFailure {
            program: program.to_owned(),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        }
    }

    fn install_args(&self, release: &InstalledRelease, wait_timeout: Duration) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("install"),
            OsString::from(&release.name),
            OsString::from(&self.chart),
            OsString::from("--namespace"),
            OsString::from(&release.namespace),
            OsString::from("--wait"),
            OsString::from("--timeout"),
            OsString::from(format!("{}s", wait_timeout.as_secs())),
            OsString::from("--values"),
            OsString::from("-"),
        ];
        if let Some(version) = &self.chart_version {
            args.push(OsString::from("--version"));
            args.push(OsString::from(version));
        }
        args.extend(helm_target_args(&release.cluster));
        args
    }

    fn release_args(verb: &str, release: &InstalledRelease) -> Vec<OsString> {
        let mut args = vec![
            OsString::from(verb),
            OsString::from(&release.name),
            OsString::from("--namespace"),
            OsString::from(&release.namespace),
        ];
        args.extend(helm_target_args(&release.cluster));
        args
    }

    async fn kubectl_get_json<T>(
        &self,
        target: &ClusterTarget,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<T, ClusterError>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut args = vec![
            OsString::from("get"),
            OsString::from(kind),
            OsString::from(name),
            OsString::from("--namespace"),
            OsString::from(namespace),
            OsString::from("--output"),
            OsString::from("json"),
        ];
        args.extend(kubectl_target_args(target));

        let output = self.exec(&self.kubectl_bin, args, None).await?;
        if !output.is_success() {
            if mentions_not_found(&output.stderr) {
                return Err(ClusterError::NotFound {
                    kind: kind.to_owned(),
                    namespace: namespace.to_owned(),
                    name: name.to_owned(),
                });
            }
            return Err(Self::failure(&self.kubectl_bin, output));
        }

        serde_json::from_str(&output.stdout).map_err(|err| ClusterError::Parse {
            resource: kind.to_owned(),
            message: err.to_string(),
        })
    }
}

impl<R: CommandRunner + 'static> Cluster for CommandCluster<R> {
    fn apply_release<'a>(
        &'a self,
        release: &'a InstalledRelease,
        values: &'a ReleaseValues,
        wait_timeout: Duration,
    ) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            let document = values.to_document()?.to_string();
            let args = self.install_args(release, wait_timeout);
            let output = self.exec(&self.helm_bin, args, Some(document)).await?;
            if output.is_success() {
                Ok(())
            } else {
                Err(Self::failure(&self.helm_bin, output))
            }
        })
    }

    fn release_exists<'a>(&'a self, release: &'a InstalledRelease) -> ClusterFuture<'a, bool> {
        Box::pin(async move {
            let args = Self::release_args("status", release);
            let output = self.exec(&self.helm_bin, args, None).await?;
            if output.is_success() {
                Ok(true)
            } else if mentions_not_found(&output.stderr) {
                Ok(false)
            } else {
                Err(Self::failure(&self.helm_bin, output))
            }
        })
    }

    fn service_external_address<'a>(
        &'a self,
        target: &'a ClusterTarget,
        namespace: &'a str,
        service: &'a str,
    ) -> ClusterFuture<'a, Option<String>> {
        Box::pin(async move {
            let object: ServiceObject = self
                .kubectl_get_json(target, "service", namespace, service)
                .await?;
            Ok(object.external_address())
        })
    }

    fn job_phase<'a>(
        &'a self,
        target: &'a ClusterTarget,
        namespace: &'a str,
        job: &'a str,
    ) -> ClusterFuture<'a, JobPhase> {
        Box::pin(async move {
            let object: JobObject = self.kubectl_get_json(target, "job", namespace, job).await?;
            Ok(object.status.phase())
        })
    }

    fn job_log_tail<'a>(
        &'a self,
        target: &'a ClusterTarget,
        namespace: &'a str,
        job: &'a str,
    ) -> ClusterFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut args = vec![
                OsString::from("logs"),
                OsString::from(format!("job/{job}")),
                OsString::from("--namespace"),
                OsString::from(namespace),
                OsString::from("--tail=1"),
            ];
            args.extend(kubectl_target_args(target));
            let output = self.exec(&self.kubectl_bin, args, None).await?;
            if !output.is_success() {
                return Err(Self::failure(&self.kubectl_bin, output));
            }
            Ok(output
                .stdout
                .lines()
                .rev()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_owned))
        })
    }

    fn uninstall<'a>(&'a self, release: &'a InstalledRelease) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            let mut args = Self::release_args("uninstall", release);
            args.push(OsString::from("--wait"));
            let output = self.exec(&self.helm_bin, args, None).await?;
            if output.is_success() || mentions_not_found(&output.stderr) {
                Ok(())
            } else {
                Err(Self::failure(&self.helm_bin, output))
            }
        })
    }
}

fn helm_target_args(target: &ClusterTarget) -> Vec<OsString> {
    target_args(target, "--kube-context")
}

fn kubectl_target_args(target: &ClusterTarget) -> Vec<OsString> {
    target_args(target, "--context")
}

fn target_args(target: &ClusterTarget, context_flag: &str) -> Vec<OsString> {
    let mut args = Vec::new();
    if let Some(path) = &target.kubeconfig {
        args.push(OsString::from("--kubeconfig"));
        args.push(OsString::from(path.as_str()));
    }
    if let Some(context) = &target.context {
        args.push(OsString::from(context_flag));
        args.push(OsString::from(context));
    }
    args
}

fn mentions_not_found(stderr: &str) -> bool {
    stderr.contains("NotFound") || stderr.to_ascii_lowercase().contains("not found")
}

#[derive(Debug, Default, Deserialize)]
struct ServiceObject {
    #[serde(default)]
    status: ServiceStatus,
}

impl ServiceObject {
    fn external_address(&self) -> Option<String> {
        self.status
            .load_balancer
            .ingress
            .iter()
            .find_map(|ingress| {
                ingress
                    .hostname
                    .as_deref()
                    .filter(|host| !host.is_empty())
                    .or_else(|| ingress.ip.as_deref().filter(|ip| !ip.is_empty()))
            })
            .map(str::to_owned)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ServiceStatus {
    #[serde(default, rename = "loadBalancer")]
    load_balancer: LoadBalancerStatus,
}

#[derive(Debug, Default, Deserialize)]
struct LoadBalancerStatus {
    #[serde(default)]
    ingress: Vec<LoadBalancerIngress>,
}

#[derive(Debug, Default, Deserialize)]
struct LoadBalancerIngress {
    ip: Option<String>,
    hostname: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JobObject {
    #[serde(default)]
    status: JobStatus,
}

#[derive(Debug, Default, Deserialize)]
struct JobStatus {
    active: Option<u32>,
    succeeded: Option<u32>,
    #[serde(default)]
    conditions: Vec<JobCondition>,
}

#[derive(Debug, Deserialize)]
struct JobCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

impl JobStatus {
    fn phase(&self) -> JobPhase {
        let condition_holds =
            |kind: &str| self.conditions.iter().any(|c| c.kind == kind && c.status == "True");
        if condition_holds("Complete") {
            JobPhase::Succeeded
        } else if condition_holds("Failed") {
            JobPhase::Failed
        } else if self.succeeded.unwrap_or(0) > 0 {
            JobPhase::Succeeded
        } else if self.active.unwrap_or(0) > 0 {
            JobPhase::Running
        } else {
            JobPhase::Pending
        }
    }
}
