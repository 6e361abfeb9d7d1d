//! Binary entry point for the `pvmigrate` CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use pvmigrate::{
    ClusterTarget, ConfigError, EndpointDescriptor, LoadBalancerStrategy, MigrateConfig,
    MigrationOptions, MigrationRun, ReleaseValues, Retryable, Role, Strategy, StrategyError,
};

mod cli;

use cli::{Cli, DestArgs, MigrateCommand, SourceArgs};

const DEFAULT_LOG_FILTER: &str = "info";
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid arguments: {0}")]
    Arguments(String),
    #[error("migration failed: {0}")]
    Strategy(#[from] StrategyError),
}

impl CliError {
    fn retry_hint(&self) -> Option<bool> {
        match self {
            Self::Strategy(err) => Some(err.is_retryable()),
            Self::Config(_) | Self::Arguments(_) => None,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Migrate(command) => {
            init_tracing(command.log_level.as_deref());
            migrate(command).await
        }
    }
}

fn init_tracing(filter: Option<&str>) {
    let env_filter = filter.map_or_else(
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        EnvFilter::new,
    );
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();
}

async fn migrate(command: MigrateCommand) -> Result<(), CliError> {
    let config = MigrateConfig::load_without_cli_args()?;
    let run = build_run(&command, &config)?;
    let cluster = Arc::new(config.command_cluster()?);
    let strategy = LoadBalancerStrategy::new(cluster).with_settings(config.strategy_settings());

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let signal_watcher = tokio::spawn(async move {
        if relay_interrupts(interrupt, tokio::signal::ctrl_c).await {
            warn!("second interrupt received, exiting without waiting for cleanup");
            process::exit(INTERRUPTED_EXIT_CODE);
        }
    });

    let result = strategy.execute(&run, &cancel).await;
    signal_watcher.abort();
    result.map_err(CliError::from)
}

/// Cancels `cancel` on the first interrupt. Returns `true` when a second
/// interrupt arrives, meaning the operator wants to quit immediately.
async fn relay_interrupts<F, Fut>(cancel: CancellationToken, mut next_interrupt: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if let Err(err) = next_interrupt().await {
        warn!(error = %err, "interrupt handling unavailable");
        return false;
    }
    warn!("interrupt received, cancelling migration (interrupt again to exit immediately)");
    cancel.cancel();
    next_interrupt().await.is_ok()
}

fn build_run(command: &MigrateCommand, config: &MigrateConfig) -> Result<MigrationRun, CliError> {
    let key_algorithm = match &command.key_algorithm {
        Some(name) => name
            .parse()
            .map_err(|err| CliError::Arguments(format!("--key-algorithm: {err}")))?,
        None => config.default_key_algorithm()?,
    };
    let value_overrides = ReleaseValues::from_overrides(&command.helm_set)
        .map_err(|err| CliError::Arguments(format!("--helm-set: {err}")))?;

    let options = MigrationOptions {
        key_algorithm,
        delete_extraneous_files: command.delete_extraneous_files,
        no_chown: command.no_chown,
        source_mount_read_only: !command.source_mount_read_write,
        show_progress: !command.no_progress_bar,
        value_overrides,
    };

    MigrationRun::new(
        source_descriptor(&command.source),
        destination_descriptor(&command.dest),
        options,
    )
    .map_err(|err| CliError::Arguments(err.to_string()))
}

fn source_descriptor(args: &SourceArgs) -> EndpointDescriptor {
    EndpointDescriptor::new(Role::Source, &args.namespace, &args.claim)
        .path(&args.path)
        .cluster(ClusterTarget::new(
            args.kubeconfig.as_deref().map(Utf8PathBuf::from),
            args.context.clone(),
        ))
}

fn destination_descriptor(args: &DestArgs) -> EndpointDescriptor {
    EndpointDescriptor::new(Role::Destination, &args.namespace, &args.claim)
        .path(&args.path)
        .cluster(ClusterTarget::new(
            args.kubeconfig.as_deref().map(Utf8PathBuf::from),
            args.context.clone(),
        ))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
    if let Some(retryable) = err.retry_hint() {
        let hint = if retryable {
            "an alternate strategy may succeed"
        } else {
            "not retryable"
        };
        writeln!(target, "{hint}").ok();
    }
}
