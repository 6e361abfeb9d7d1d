//! Scenario bindings for load-balanced service strategy behaviour.

use rstest_bdd_macros::scenario;

use super::test_helpers::{StrategyContext, strategy_context};

#[scenario(
    path = "tests/features/strategy.feature",
    name = "Migrate a volume and remove both endpoints"
)]
fn scenario_successful_migration(strategy_context: StrategyContext) {
    let _ = strategy_context;
}

#[scenario(
    path = "tests/features/strategy.feature",
    name = "Stop before the destination when the source install fails"
)]
fn scenario_source_install_fails(strategy_context: StrategyContext) {
    let _ = strategy_context;
}

#[scenario(
    path = "tests/features/strategy.feature",
    name = "Remove the source endpoint when no address is assigned"
)]
fn scenario_address_timeout(strategy_context: StrategyContext) {
    let _ = strategy_context;
}

#[scenario(
    path = "tests/features/strategy.feature",
    name = "Surface a failed transfer job and still clean up"
)]
fn scenario_job_failure(strategy_context: StrategyContext) {
    let _ = strategy_context;
}

#[scenario(
    path = "tests/features/strategy.feature",
    name = "Tear down the source endpoint when the run is cancelled"
)]
fn scenario_cancellation(strategy_context: StrategyContext) {
    let _ = strategy_context;
}

#[scenario(
    path = "tests/features/strategy.feature",
    name = "Keep cleaning up when one uninstall fails"
)]
fn scenario_best_effort_cleanup(strategy_context: StrategyContext) {
    let _ = strategy_context;
}
