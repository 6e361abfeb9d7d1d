//! Core library for the `pvmigrate` volume migration tool.
//!
//! The crate copies the contents of a persistent volume claim to another claim,
//! possibly in another cluster, by installing two short-lived endpoints from a
//! chart: an SSH daemon next to the source volume, exposed through a
//! load-balanced service, and an rsync job next to the destination volume. The
//! [`LoadBalancerStrategy`] drives that sequence (keys → source → address →
//! destination → job) and tears every release down again, whatever the
//! outcome.

pub mod address;
pub mod cleanup;
pub mod cluster;
pub mod config;
pub mod install;
pub mod keys;
pub mod migration;
pub mod monitor;
pub mod strategy;
#[cfg(test)]
pub mod test_helpers;
pub mod test_support;
pub mod values;

pub use address::{AddressResolutionError, AddressResolver, format_host};
pub use cleanup::{CleanupCoordinator, CleanupError, CleanupReport};
pub use cluster::{
    Cluster, ClusterError, ClusterFuture, CommandCluster, CommandOutput, CommandRunner,
    InstalledRelease, JobPhase, ProcessCommandRunner,
};
pub use config::{ConfigError, MigrateConfig};
pub use install::{EndpointInstaller, InstallationError, ReleaseTracker};
pub use keys::{KeyAlgorithm, KeyGenerationError, KeyPair, create_key_pair};
pub use migration::{
    ClusterTarget, EndpointDescriptor, MigrationError, MigrationOptions, MigrationRun, Role, RunId,
};
pub use monitor::{JobError, JobMonitor, TransferProgress};
pub use strategy::{
    LoadBalancerStrategy, Retryable, Strategy, StrategyError, StrategyFuture, StrategySettings,
};
pub use values::{ReleaseValues, ValuesError};
