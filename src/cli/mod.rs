//! Command-line interface definitions for the `pvmigrate` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `pvmigrate` binary.
#[derive(Debug, Parser)]
#[command(
    name = "pvmigrate",
    about = "Copy persistent volume data between namespaces and clusters",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Copy a volume through a load-balanced SSH endpoint.
    #[command(
        name = "migrate",
        about = "Copy a volume through a load-balanced SSH endpoint"
    )]
    Migrate(MigrateCommand),
}

/// Arguments for the `pvmigrate migrate` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct MigrateCommand {
    /// Volume to copy from.
    #[command(flatten)]
    pub(crate) source: SourceArgs,
    /// Volume to copy into.
    #[command(flatten)]
    pub(crate) dest: DestArgs,
    /// Extra chart value applied to both endpoints (`key=value`, repeatable).
    ///
    /// Later entries win, and every entry wins over the values computed for
    /// the run.
    #[arg(long = "helm-set", value_name = "KEY=VALUE")]
    pub(crate) helm_set: Vec<String>,
    /// Key algorithm for the transfer key pair (`ed25519` or `rsa`).
    ///
    /// Defaults to the configured algorithm.
    #[arg(long, short = 'a', value_name = "ALGORITHM")]
    pub(crate) key_algorithm: Option<String>,
    /// Delete files on the destination that do not exist on the source.
    #[arg(long, short = 'd')]
    pub(crate) delete_extraneous_files: bool,
    /// Do not preserve file ownership on the destination.
    #[arg(long)]
    pub(crate) no_chown: bool,
    /// Mount the source volume read-write instead of read-only.
    #[arg(long)]
    pub(crate) source_mount_read_write: bool,
    /// Do not render transfer progress.
    #[arg(long)]
    pub(crate) no_progress_bar: bool,
    /// Log filter, for example `info` or `pvmigrate=debug`.
    ///
    /// Falls back to `RUST_LOG`, then `info`.
    #[arg(long, value_name = "FILTER")]
    pub(crate) log_level: Option<String>,
}

/// Location of the source volume.
#[derive(Debug, Args)]
pub(crate) struct SourceArgs {
    /// Persistent volume claim to copy from.
    #[arg(id = "source_claim", long = "source", value_name = "CLAIM")]
    pub(crate) claim: String,
    /// Namespace of the source claim.
    #[arg(
        id = "source_namespace",
        long = "source-namespace",
        value_name = "NAMESPACE",
        default_value = "default"
    )]
    pub(crate) namespace: String,
    /// Path inside the source volume.
    #[arg(id = "source_path", long = "source-path", value_name = "PATH", default_value = "/")]
    pub(crate) path: String,
    /// Kubeconfig for the source cluster.
    #[arg(id = "source_kubeconfig", long = "source-kubeconfig", value_name = "FILE")]
    pub(crate) kubeconfig: Option<String>,
    /// Kubeconfig context for the source cluster.
    #[arg(id = "source_context", long = "source-context", value_name = "CONTEXT")]
    pub(crate) context: Option<String>,
}

/// Location of the destination volume.
#[derive(Debug, Args)]
pub(crate) struct DestArgs {
    /// Persistent volume claim to copy into.
    #[arg(id = "dest_claim", long = "dest", value_name = "CLAIM")]
    pub(crate) claim: String,
    /// Namespace of the destination claim.
    #[arg(
        id = "dest_namespace",
        long = "dest-namespace",
        value_name = "NAMESPACE",
        default_value = "default"
    )]
    pub(crate) namespace: String,
    /// Path inside the destination volume.
    #[arg(id = "dest_path", long = "dest-path", value_name = "PATH", default_value = "/")]
    pub(crate) path: String,
    /// Kubeconfig for the destination cluster.
    #[arg(id = "dest_kubeconfig", long = "dest-kubeconfig", value_name = "FILE")]
    pub(crate) kubeconfig: Option<String>,
    /// Kubeconfig context for the destination cluster.
    #[arg(id = "dest_context", long = "dest-context", value_name = "CONTEXT")]
    pub(crate) context: Option<String>,
}
