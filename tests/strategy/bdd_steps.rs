//! Step definitions for load-balanced service strategy scenarios.

use std::sync::Arc;

use pvmigrate::{JobPhase, LoadBalancerStrategy, Retryable, Strategy, StrategyError};
use rstest_bdd_macros::{given, then, when};
use thiserror::Error;

use super::test_helpers::{
    FailureKind, StrategyContext, StrategyOutcome, build_run, fast_settings, release_name,
};

#[derive(Debug, Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given(
    "a source claim \"{source}\" in namespace \"{source_ns}\" and a destination claim \"{dest}\" in namespace \"{dest_ns}\""
)]
fn given_claims(
    mut strategy_context: StrategyContext,
    source: String,
    source_ns: String,
    dest: String,
    dest_ns: String,
) -> StrategyContext {
    strategy_context.run = Some(build_run(
        source.trim(),
        source_ns.trim(),
        dest.trim(),
        dest_ns.trim(),
    ));
    strategy_context
}

#[given("the load balancer assigns address \"{address}\"")]
fn given_address(strategy_context: StrategyContext, address: String) -> StrategyContext {
    strategy_context.cluster.push_address(None);
    strategy_context.cluster.push_address(Some(address.trim()));
    strategy_context
}

#[given("the load balancer never assigns an address")]
fn given_no_address(strategy_context: StrategyContext) -> StrategyContext {
    strategy_context
}

#[given("the transfer job runs to completion")]
fn given_job_succeeds(strategy_context: StrategyContext) -> StrategyContext {
    strategy_context
        .cluster
        .push_phases(&[JobPhase::Pending, JobPhase::Running, JobPhase::Succeeded]);
    strategy_context
}

#[given("the transfer job fails")]
fn given_job_fails(strategy_context: StrategyContext) -> StrategyContext {
    strategy_context
        .cluster
        .push_phases(&[JobPhase::Running, JobPhase::Failed]);
    strategy_context
}

#[given("the source endpoint install fails")]
fn given_source_install_fails(strategy_context: StrategyContext) -> StrategyContext {
    strategy_context.cluster.fail_apply("-src");
    strategy_context
}

#[given("the run is cancelled once the source endpoint is installed")]
fn given_cancel_after_source(strategy_context: StrategyContext) -> StrategyContext {
    strategy_context
        .cluster
        .cancel_after_apply("-src", strategy_context.cancel.clone());
    strategy_context
}

#[given("uninstalling the destination endpoint fails")]
fn given_destination_uninstall_fails(strategy_context: StrategyContext) -> StrategyContext {
    strategy_context.cluster.fail_uninstall("-dest");
    strategy_context
}

#[when("I run the load-balancer strategy")]
fn when_run_strategy(mut strategy_context: StrategyContext) -> StrategyContext {
    let Some(run) = strategy_context.run.clone() else {
        panic!("scenario must declare the claims to migrate");
    };
    let runtime = tokio::runtime::Runtime::new()
        .unwrap_or_else(|err| panic!("failed to build runtime: {err}"));
    let strategy = LoadBalancerStrategy::new(Arc::new(strategy_context.cluster.clone()))
        .with_settings(fast_settings());

    let result = runtime.block_on(strategy.execute(&run, &strategy_context.cancel));
    strategy_context.outcome = Some(match result {
        Ok(()) => StrategyOutcome::Success,
        Err(err) => StrategyOutcome::Failure {
            kind: classify(&err),
            retryable: err.is_retryable(),
            message: err.to_string(),
        },
    });
    strategy_context
}

const fn classify(err: &StrategyError) -> FailureKind {
    match err {
        StrategyError::KeyGeneration(_) => FailureKind::KeyGeneration,
        StrategyError::Installation(_) => FailureKind::Installation,
        StrategyError::AddressResolution(_) => FailureKind::Address,
        StrategyError::Job(_) => FailureKind::Job,
        StrategyError::Cancelled => FailureKind::Cancelled,
    }
}

fn expected_kind(name: &str) -> Result<FailureKind, StepError> {
    match name {
        "key generation" => Ok(FailureKind::KeyGeneration),
        "installation" => Ok(FailureKind::Installation),
        "address" => Ok(FailureKind::Address),
        "job" => Ok(FailureKind::Job),
        "cancelled" => Ok(FailureKind::Cancelled),
        other => Err(StepError::Assertion(format!("unknown failure kind {other}"))),
    }
}

#[then("the migration succeeds")]
fn then_succeeds(strategy_context: &StrategyContext) -> Result<(), StepError> {
    match &strategy_context.outcome {
        Some(StrategyOutcome::Success) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected success, got {other:?}"
        ))),
    }
}

#[then("the migration fails with a {retry} \"{kind}\" error")]
fn then_fails_with(
    strategy_context: &StrategyContext,
    retry: String,
    kind: String,
) -> Result<(), StepError> {
    let expected = expected_kind(kind.trim())?;
    let expected_retryable = match retry.trim() {
        "retryable" => true,
        "terminal" => false,
        other => {
            return Err(StepError::Assertion(format!(
                "unknown retry classification {other}"
            )));
        }
    };

    match &strategy_context.outcome {
        Some(StrategyOutcome::Failure {
            kind: actual,
            retryable,
            message,
        }) => {
            if *actual != expected {
                return Err(StepError::Assertion(format!(
                    "expected {expected:?} failure, got {actual:?}: {message}"
                )));
            }
            if *retryable != expected_retryable {
                return Err(StepError::Assertion(format!(
                    "expected retryable={expected_retryable} for {message}"
                )));
            }
            Ok(())
        }
        other => Err(StepError::Assertion(format!(
            "expected failure, got {other:?}"
        ))),
    }
}

#[then("the destination connects to \"{host}\"")]
fn then_destination_host(strategy_context: &StrategyContext, host: String) -> Result<(), StepError> {
    let destination = release_name("dest");
    let calls = strategy_context.cluster.apply_calls();
    let call = calls
        .iter()
        .find(|call| call.release.name == destination)
        .ok_or_else(|| StepError::Assertion(String::from("destination was never installed")))?;
    let actual = call.values.get("rsync.sshRemoteHost");
    if actual != Some(host.trim()) {
        return Err(StepError::Assertion(format!(
            "expected remote host {host}, got {actual:?}"
        )));
    }
    Ok(())
}

#[then("every installed release is uninstalled once")]
fn then_all_uninstalled(strategy_context: &StrategyContext) -> Result<(), StepError> {
    let cluster = &strategy_context.cluster;
    let uninstalled: Vec<String> = cluster
        .uninstall_calls()
        .into_iter()
        .map(|release| release.name)
        .collect();
    let expected = vec![release_name("dest"), release_name("src")];
    if uninstalled != expected {
        return Err(StepError::Assertion(format!(
            "expected uninstalls {expected:?}, got {uninstalled:?}"
        )));
    }
    if uninstalled.len() != cluster.successful_applies() {
        return Err(StepError::Assertion(format!(
            "{} releases created but {} uninstalled",
            cluster.successful_applies(),
            uninstalled.len()
        )));
    }
    Ok(())
}

#[then("no destination endpoint is installed")]
fn then_no_destination(strategy_context: &StrategyContext) -> Result<(), StepError> {
    let destination = release_name("dest");
    if strategy_context
        .cluster
        .apply_calls()
        .iter()
        .any(|call| call.release.name == destination)
    {
        return Err(StepError::Assertion(String::from(
            "destination endpoint should not be installed",
        )));
    }
    Ok(())
}

#[then("no release is uninstalled")]
fn then_nothing_uninstalled(strategy_context: &StrategyContext) -> Result<(), StepError> {
    let calls = strategy_context.cluster.uninstall_calls();
    if !calls.is_empty() {
        return Err(StepError::Assertion(format!(
            "expected no uninstalls, got {calls:?}"
        )));
    }
    Ok(())
}

#[then("only the source endpoint is uninstalled")]
fn then_only_source_uninstalled(strategy_context: &StrategyContext) -> Result<(), StepError> {
    let names: Vec<String> = strategy_context
        .cluster
        .uninstall_calls()
        .into_iter()
        .map(|release| release.name)
        .collect();
    if names != vec![release_name("src")] {
        return Err(StepError::Assertion(format!(
            "expected only the source release to be removed, got {names:?}"
        )));
    }
    Ok(())
}
