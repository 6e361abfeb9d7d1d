//! Shared fixtures and helpers for strategy BDD scenarios.

use std::time::Duration;

use pvmigrate::test_support::FakeCluster;
use pvmigrate::{
    EndpointDescriptor, MigrationOptions, MigrationRun, Role, RunId, StrategySettings,
};
use rstest::fixture;
use tokio_util::sync::CancellationToken;

pub const RUN_ID: &str = "b7e21";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FailureKind {
    KeyGeneration,
    Installation,
    Address,
    Job,
    Cancelled,
}

#[derive(Clone, Debug)]
pub enum StrategyOutcome {
    Success,
    Failure {
        kind: FailureKind,
        retryable: bool,
        message: String,
    },
}

#[derive(Clone, Debug)]
pub struct StrategyContext {
    pub cluster: FakeCluster,
    pub cancel: CancellationToken,
    pub run: Option<MigrationRun>,
    pub outcome: Option<StrategyOutcome>,
}

#[fixture]
pub fn strategy_context() -> StrategyContext {
    StrategyContext {
        cluster: FakeCluster::new(),
        cancel: CancellationToken::new(),
        run: None,
        outcome: None,
    }
}

pub fn build_run(source: &str, source_ns: &str, dest: &str, dest_ns: &str) -> MigrationRun {
    MigrationRun::with_id(
        RunId::from(RUN_ID),
        EndpointDescriptor::new(Role::Source, source_ns, source),
        EndpointDescriptor::new(Role::Destination, dest_ns, dest),
        MigrationOptions {
            show_progress: false,
            ..MigrationOptions::default()
        },
    )
    .unwrap_or_else(|err| panic!("migration run should be valid: {err}"))
}

pub fn fast_settings() -> StrategySettings {
    StrategySettings {
        install_timeout: Duration::from_secs(60),
        address_poll_interval: Duration::from_millis(5),
        address_timeout: Duration::from_millis(50),
        job_poll_interval: Duration::from_millis(5),
    }
}

pub fn release_name(suffix: &str) -> String {
    format!("pv-migrate-{RUN_ID}-{suffix}")
}
