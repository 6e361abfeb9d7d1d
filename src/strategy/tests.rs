//! Unit tests for the load-balanced service strategy.

use std::time::Duration;

use super::*;
use crate::cluster::{ClusterError, ClusterFuture, InstalledRelease, JobPhase};
use crate::migration::{ClusterTarget, EndpointDescriptor, MigrationOptions, Role, RunId};
use crate::test_support::FakeCluster;
use crate::values::ReleaseValues;
use rstest::{fixture, rstest};

#[fixture]
fn run() -> MigrationRun {
    MigrationRun::with_id(
        RunId::from("0f3a9"),
        EndpointDescriptor::new(Role::Source, "apps", "data"),
        EndpointDescriptor::new(Role::Destination, "backup", "data-copy"),
        MigrationOptions {
            show_progress: false,
            ..MigrationOptions::default()
        },
    )
    .expect("fixture run should be valid")
}

fn fast_settings() -> StrategySettings {
    StrategySettings {
        install_timeout: Duration::from_secs(60),
        address_poll_interval: Duration::from_secs(1),
        address_timeout: Duration::from_secs(5),
        job_poll_interval: Duration::from_secs(1),
    }
}

fn strategy(cluster: &FakeCluster) -> LoadBalancerStrategy<FakeCluster> {
    LoadBalancerStrategy::new(Arc::new(cluster.clone())).with_settings(fast_settings())
}

fn uninstalled(cluster: &FakeCluster) -> Vec<String> {
    cluster
        .uninstall_calls()
        .into_iter()
        .map(|release| release.name)
        .collect()
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn successful_run_installs_transfers_and_cleans_up(run: MigrationRun) {
    let cluster = FakeCluster::new();
    cluster.push_address(None);
    cluster.push_address(Some("2001:db8::7"));
    cluster.push_phases(&[JobPhase::Pending, JobPhase::Running, JobPhase::Succeeded]);

    strategy(&cluster)
        .execute(&run, &CancellationToken::new())
        .await
        .expect("run should succeed");

    assert_eq!(
        cluster.events(),
        vec![
            "apply pv-migrate-0f3a9-src",
            "apply pv-migrate-0f3a9-dest",
            "uninstall pv-migrate-0f3a9-dest",
            "uninstall pv-migrate-0f3a9-src",
        ]
    );
    assert!(cluster.existing_releases().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn keys_and_formatted_address_reach_the_endpoints(run: MigrationRun) {
    let cluster = FakeCluster::new();
    cluster.push_address(Some("2001:db8::7"));
    cluster.push_phases(&[JobPhase::Succeeded]);

    strategy(&cluster)
        .execute(&run, &CancellationToken::new())
        .await
        .expect("run should succeed");

    let calls = cluster.apply_calls();
    let (source, destination) = match calls.as_slice() {
        [source, destination] => (source, destination),
        other => panic!("expected two applies, got {}", other.len()),
    };
    let public = ssh_key::PublicKey::from_openssh(
        source.values.get("sshd.publicKey").expect("public key set"),
    )
    .expect("public key parses");
    let private = ssh_key::PrivateKey::from_openssh(
        destination
            .values
            .get("rsync.privateKey")
            .expect("private key set"),
    )
    .expect("private key parses");
    assert_eq!(private.public_key().key_data(), public.key_data());
    assert_eq!(
        destination.values.get("rsync.sshRemoteHost"),
        Some("[2001:db8::7]")
    );
    assert_eq!(
        destination.values.get("rsync.privateKeyMountPath"),
        Some("/root/.ssh/id_ed25519")
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn source_failure_skips_destination(run: MigrationRun) {
    let cluster = FakeCluster::new();
    cluster.fail_apply("-src");

    let err = strategy(&cluster)
        .execute(&run, &CancellationToken::new())
        .await
        .expect_err("run should fail");

    assert!(matches!(err, StrategyError::Installation(_)));
    assert!(err.is_retryable());
    assert_eq!(cluster.apply_calls().len(), 1);
    assert!(cluster.uninstall_calls().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn address_timeout_tears_down_the_source(run: MigrationRun) {
    let cluster = FakeCluster::new();

    let err = strategy(&cluster)
        .execute(&run, &CancellationToken::new())
        .await
        .expect_err("run should fail");

    assert!(matches!(err, StrategyError::AddressResolution(_)));
    assert!(err.is_retryable());
    assert_eq!(cluster.apply_calls().len(), 1);
    assert_eq!(uninstalled(&cluster), vec!["pv-migrate-0f3a9-src"]);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn destination_failure_cleans_up_both_when_partially_created(run: MigrationRun) {
    let cluster = FakeCluster::new();
    cluster.push_address(Some("203.0.113.9"));
    cluster.fail_apply("-dest");
    cluster.leave_partial_release_on_failure();

    let err = strategy(&cluster)
        .execute(&run, &CancellationToken::new())
        .await
        .expect_err("run should fail");

    assert!(matches!(err, StrategyError::Installation(_)));
    assert_eq!(
        uninstalled(&cluster),
        vec!["pv-migrate-0f3a9-dest", "pv-migrate-0f3a9-src"]
    );
    assert!(cluster.existing_releases().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn job_failure_is_retryable_and_cleans_up(run: MigrationRun) {
    let cluster = FakeCluster::new();
    cluster.push_address(Some("203.0.113.9"));
    cluster.push_phases(&[JobPhase::Running, JobPhase::Failed]);

    let err = strategy(&cluster)
        .execute(&run, &CancellationToken::new())
        .await
        .expect_err("run should fail");

    assert!(matches!(err, StrategyError::Job(JobError::Failed { .. })));
    assert!(err.is_retryable());
    assert_eq!(cluster.uninstall_calls().len(), cluster.successful_applies());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn cancellation_after_source_install_stops_the_run(run: MigrationRun) {
    let cluster = FakeCluster::new();
    let cancel = CancellationToken::new();
    cluster.cancel_after_apply("-src", cancel.clone());
    cluster.push_address(Some("203.0.113.9"));

    let err = strategy(&cluster)
        .execute(&run, &cancel)
        .await
        .expect_err("run should be cancelled");

    assert!(matches!(err, StrategyError::Cancelled));
    assert!(!err.is_retryable());
    assert_eq!(cluster.apply_calls().len(), 1);
    assert_eq!(uninstalled(&cluster), vec!["pv-migrate-0f3a9-src"]);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn cancellation_while_resolving_stops_polling(run: MigrationRun) {
    let cluster = FakeCluster::new();
    let cancel = CancellationToken::new();
    let strategy = LoadBalancerStrategy::new(Arc::new(cluster.clone())).with_settings(
        StrategySettings {
            address_timeout: Duration::from_secs(600),
            ..fast_settings()
        },
    );

    let trigger = cancel.clone();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        trigger.cancel();
    });
    let err = strategy
        .execute(&run, &cancel)
        .await
        .expect_err("run should be cancelled");
    canceller.await.expect("canceller should finish");

    assert!(matches!(err, StrategyError::Cancelled));
    assert!(cluster.address_calls() < 10);
    assert_eq!(uninstalled(&cluster), vec!["pv-migrate-0f3a9-src"]);
}

#[rstest]
fn strategy_reports_its_name() {
    let strategy = LoadBalancerStrategy::new(Arc::new(FakeCluster::new()));
    assert_eq!(strategy.name(), "lbsvc");
    assert_eq!(strategy.settings(), &StrategySettings::default());
}

fn explode() -> Result<JobPhase, ClusterError> {
    panic!("job watch exploded")
}

/// Delegates to a [`FakeCluster`] but panics while watching the job.
struct PanickingCluster {
    inner: FakeCluster,
}

impl Cluster for PanickingCluster {
    fn apply_release<'a>(
        &'a self,
        release: &'a InstalledRelease,
        values: &'a ReleaseValues,
        wait_timeout: Duration,
    ) -> ClusterFuture<'a, ()> {
        self.inner.apply_release(release, values, wait_timeout)
    }

    fn release_exists<'a>(&'a self, release: &'a InstalledRelease) -> ClusterFuture<'a, bool> {
        self.inner.release_exists(release)
    }

    fn service_external_address<'a>(
        &'a self,
        target: &'a ClusterTarget,
        namespace: &'a str,
        service: &'a str,
    ) -> ClusterFuture<'a, Option<String>> {
        self.inner.service_external_address(target, namespace, service)
    }

    fn job_phase<'a>(
        &'a self,
        _target: &'a ClusterTarget,
        _namespace: &'a str,
        _job: &'a str,
    ) -> ClusterFuture<'a, JobPhase> {
        Box::pin(async { explode() })
    }

    fn job_log_tail<'a>(
        &'a self,
        target: &'a ClusterTarget,
        namespace: &'a str,
        job: &'a str,
    ) -> ClusterFuture<'a, Option<String>> {
        self.inner.job_log_tail(target, namespace, job)
    }

    fn uninstall<'a>(&'a self, release: &'a InstalledRelease) -> ClusterFuture<'a, ()> {
        self.inner.uninstall(release)
    }
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn panic_during_the_run_still_cleans_up(run: MigrationRun) {
    let inner = FakeCluster::new();
    inner.push_address(Some("203.0.113.9"));
    let strategy = LoadBalancerStrategy::new(Arc::new(PanickingCluster {
        inner: inner.clone(),
    }))
    .with_settings(fast_settings());

    let outcome = AssertUnwindSafe(strategy.execute(&run, &CancellationToken::new()))
        .catch_unwind()
        .await;

    assert!(outcome.is_err());
    assert_eq!(inner.uninstall_calls().len(), 2);
}

#[rstest]
fn cancelled_is_the_only_terminal_error() {
    let errors = [
        StrategyError::KeyGeneration(KeyGenerationError::UnsupportedAlgorithm {
            algorithm: String::from("dsa"),
        }),
        StrategyError::Job(JobError::Watch {
            namespace: String::from("backup"),
            job: String::from("rsync"),
            source: ClusterError::Spawn {
                program: String::from("kubectl"),
                message: String::from("gone"),
            },
        }),
    ];
    assert!(errors.iter().all(Retryable::is_retryable));
    assert!(!StrategyError::Cancelled.is_retryable());
}
