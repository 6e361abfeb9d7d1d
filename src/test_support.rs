//! Test support utilities shared across unit and integration tests.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cluster::{
    Cluster, ClusterError, ClusterFuture, CommandOutput, CommandRunner, InstalledRelease, JobPhase,
};
use crate::install::ReleaseTracker;
use crate::migration::ClusterTarget;
use crate::values::ReleaseValues;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Data written to the program's stdin.
    pub stdin: Option<String>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status with empty output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, ClusterError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            stdin: stdin.map(str::to_owned),
        });
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| ClusterError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Tracker that records every release it is told about.
#[derive(Clone, Debug, Default)]
pub struct RecordingTracker {
    tracked: Arc<Mutex<Vec<InstalledRelease>>>,
}

impl RecordingTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases recorded so far, in order.
    #[must_use]
    pub fn tracked(&self) -> Vec<InstalledRelease> {
        lock(&self.tracked).clone()
    }
}

impl ReleaseTracker for RecordingTracker {
    fn track(&self, release: InstalledRelease) {
        lock(&self.tracked).push(release);
    }
}

/// A single `apply_release` call observed by [`FakeCluster`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApplyCall {
    /// Release being applied.
    pub release: InstalledRelease,
    /// Values handed to the template.
    pub values: ReleaseValues,
    /// Readiness wait requested by the caller.
    pub wait_timeout: Duration,
}

#[derive(Debug, Default)]
struct FakeState {
    apply_calls: Vec<ApplyCall>,
    existing: Vec<InstalledRelease>,
    fail_apply_suffixes: Vec<String>,
    partial_on_failure: bool,
    cancel_after_apply: Option<(String, CancellationToken)>,
    addresses: VecDeque<Result<Option<String>, ClusterError>>,
    address_calls: usize,
    phases: VecDeque<Result<JobPhase, ClusterError>>,
    last_phase: Option<JobPhase>,
    log_lines: VecDeque<String>,
    uninstall_calls: Vec<InstalledRelease>,
    fail_uninstall_suffixes: Vec<String>,
    events: Vec<String>,
}

/// In-memory [`Cluster`] that records calls and replays scripted answers.
///
/// Address lookups return `None` once the scripted queue is exhausted, so an
/// unscripted service never receives an address. Job lookups repeat the last
/// scripted phase.
#[derive(Clone, Debug, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCluster {
    /// Creates a cluster with no scripted behaviour.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes applies of releases whose name ends with `suffix` fail.
    pub fn fail_apply(&self, suffix: &str) {
        lock(&self.state).fail_apply_suffixes.push(suffix.to_owned());
    }

    /// Leaves a partially created release behind when an apply fails.
    pub fn leave_partial_release_on_failure(&self) {
        lock(&self.state).partial_on_failure = true;
    }

    /// Cancels `token` right after a release ending with `suffix` is applied.
    pub fn cancel_after_apply(&self, suffix: &str, token: CancellationToken) {
        lock(&self.state).cancel_after_apply = Some((suffix.to_owned(), token));
    }

    /// Queues an address lookup answer (`None` = not assigned yet).
    pub fn push_address(&self, address: Option<&str>) {
        lock(&self.state)
            .addresses
            .push_back(Ok(address.map(str::to_owned)));
    }

    /// Queues a failing address lookup.
    pub fn push_address_error(&self, error: ClusterError) {
        lock(&self.state).addresses.push_back(Err(error));
    }

    /// Queues job phases to report in order.
    pub fn push_phases(&self, phases: &[JobPhase]) {
        let mut state = lock(&self.state);
        state.phases.extend(phases.iter().copied().map(Ok));
    }

    /// Queues a failing job lookup.
    pub fn push_phase_error(&self, error: ClusterError) {
        lock(&self.state).phases.push_back(Err(error));
    }

    /// Queues a log line returned by the next `job_log_tail` call.
    pub fn push_log_line(&self, line: &str) {
        lock(&self.state).log_lines.push_back(line.to_owned());
    }

    /// Makes uninstalls of releases whose name ends with `suffix` fail.
    pub fn fail_uninstall(&self, suffix: &str) {
        lock(&self.state)
            .fail_uninstall_suffixes
            .push(suffix.to_owned());
    }

    /// Every apply call, in order.
    #[must_use]
    pub fn apply_calls(&self) -> Vec<ApplyCall> {
        lock(&self.state).apply_calls.clone()
    }

    /// Number of applies that created a release.
    #[must_use]
    pub fn successful_applies(&self) -> usize {
        let state = lock(&self.state);
        state
            .apply_calls
            .iter()
            .filter(|call| !Self::matches(&state.fail_apply_suffixes, &call.release))
            .count()
    }

    /// Every uninstall call, in order.
    #[must_use]
    pub fn uninstall_calls(&self) -> Vec<InstalledRelease> {
        lock(&self.state).uninstall_calls.clone()
    }

    /// Releases currently present on the fake cluster.
    #[must_use]
    pub fn existing_releases(&self) -> Vec<InstalledRelease> {
        lock(&self.state).existing.clone()
    }

    /// Number of address lookups performed.
    #[must_use]
    pub fn address_calls(&self) -> usize {
        lock(&self.state).address_calls
    }

    /// Chronological log of mutating calls, e.g. `apply <name>`.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        lock(&self.state).events.clone()
    }

    fn matches(suffixes: &[String], release: &InstalledRelease) -> bool {
        suffixes
            .iter()
            .any(|suffix| release.name.ends_with(suffix.as_str()))
    }
}

impl Cluster for FakeCluster {
    fn apply_release<'a>(
        &'a self,
        release: &'a InstalledRelease,
        values: &'a ReleaseValues,
        wait_timeout: Duration,
    ) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.apply_calls.push(ApplyCall {
                release: release.clone(),
                values: values.clone(),
                wait_timeout,
            });
            state.events.push(format!("apply {}", release.name));

            if Self::matches(&state.fail_apply_suffixes, release) {
                if state.partial_on_failure {
                    state.existing.push(release.clone());
                }
                return Err(ClusterError::CommandFailure {
                    program: String::from("helm"),
                    status: Some(1),
                    status_text: String::from("1"),
                    stderr: String::from("timed out waiting for the condition"),
                });
            }

            state.existing.push(release.clone());
            if let Some((suffix, token)) = &state.cancel_after_apply
                && release.name.ends_with(suffix.as_str())
            {
                token.cancel();
            }
            Ok(())
        })
    }

    fn release_exists<'a>(&'a self, release: &'a InstalledRelease) -> ClusterFuture<'a, bool> {
        Box::pin(async move { Ok(lock(&self.state).existing.contains(release)) })
    }

    fn service_external_address<'a>(
        &'a self,
        _target: &'a ClusterTarget,
        _namespace: &'a str,
        _service: &'a str,
    ) -> ClusterFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.address_calls += 1;
            state.addresses.pop_front().unwrap_or(Ok(None))
        })
    }

    fn job_phase<'a>(
        &'a self,
        _target: &'a ClusterTarget,
        _namespace: &'a str,
        _job: &'a str,
    ) -> ClusterFuture<'a, JobPhase> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            match state.phases.pop_front() {
                Some(Ok(phase)) => {
                    state.last_phase = Some(phase);
                    Ok(phase)
                }
                Some(Err(err)) => Err(err),
                None => Ok(state.last_phase.unwrap_or(JobPhase::Pending)),
            }
        })
    }

    fn job_log_tail<'a>(
        &'a self,
        _target: &'a ClusterTarget,
        _namespace: &'a str,
        _job: &'a str,
    ) -> ClusterFuture<'a, Option<String>> {
        Box::pin(async move { Ok(lock(&self.state).log_lines.pop_front()) })
    }

    fn uninstall<'a>(&'a self, release: &'a InstalledRelease) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.uninstall_calls.push(release.clone());
            state.events.push(format!("uninstall {}", release.name));
            if Self::matches(&state.fail_uninstall_suffixes, release) {
                return Err(ClusterError::CommandFailure {
                    program: String::from("helm"),
                    status: Some(1),
                    status_text: String::from("1"),
                    stderr: String::from("uninstall refused"),
                });
            }
            state.existing.retain(|existing| existing != release);
            Ok(())
        })
    }
}
