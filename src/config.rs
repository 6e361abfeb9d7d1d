//! Configuration loading via `ortho-config`.
//!
//! [`MigrateConfig`] holds the settings that rarely change between runs: which
//! executables to call, which chart to install and how long to wait for the
//! cluster. Per-run inputs (volumes, namespaces, flags) come from the CLI.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::cluster::{CommandCluster, DEFAULT_HELM_BIN, DEFAULT_KUBECTL_BIN, ProcessCommandRunner};
use crate::keys::KeyAlgorithm;
use crate::strategy::StrategySettings;

/// Tool settings merged from defaults, `pvmigrate.toml` and `PVMIGRATE_*`
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "PVMIGRATE",
    discovery(
        app_name = "pvmigrate",
        env_var = "PVMIGRATE_CONFIG_PATH",
        config_file_name = "pvmigrate.toml",
        dotfile_name = ".pvmigrate.toml",
        project_file_name = "pvmigrate.toml"
    )
)]
pub struct MigrateConfig {
    /// Path to the `helm` executable.
    #[ortho_config(default = DEFAULT_HELM_BIN.to_owned())]
    pub helm_bin: String,
    /// Path to the `kubectl` executable.
    #[ortho_config(default = DEFAULT_KUBECTL_BIN.to_owned())]
    pub kubectl_bin: String,
    /// Chart reference passed to `helm install`, for example an OCI URL or a
    /// local directory. Required.
    pub chart: Option<String>,
    /// Chart version to pin; the latest version is used when unset.
    pub chart_version: Option<String>,
    /// Default key algorithm (`ed25519` or `rsa`).
    #[ortho_config(default = KeyAlgorithm::default().as_str().to_owned())]
    pub key_algorithm: String,
    /// Readiness wait for each endpoint release, in seconds.
    #[ortho_config(default = 60)]
    pub install_timeout_secs: u64,
    /// Time allowed for the load balancer to assign an address, in seconds.
    #[ortho_config(default = 120)]
    pub lb_service_timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to pvmigrate.toml",
            self.env_var, self.toml_key
        )
    }
}

const CHART: FieldMetadata = FieldMetadata::new("chart reference", "PVMIGRATE_CHART", "chart");
const HELM_BIN: FieldMetadata =
    FieldMetadata::new("helm executable", "PVMIGRATE_HELM_BIN", "helm_bin");
const KUBECTL_BIN: FieldMetadata =
    FieldMetadata::new("kubectl executable", "PVMIGRATE_KUBECTL_BIN", "kubectl_bin");
const KEY_ALGORITHM: FieldMetadata =
    FieldMetadata::new("key algorithm", "PVMIGRATE_KEY_ALGORITHM", "key_algorithm");
const INSTALL_TIMEOUT: FieldMetadata = FieldMetadata::new(
    "install timeout",
    "PVMIGRATE_INSTALL_TIMEOUT_SECS",
    "install_timeout_secs",
);
const LB_SERVICE_TIMEOUT: FieldMetadata = FieldMetadata::new(
    "load balancer address timeout",
    "PVMIGRATE_LB_SERVICE_TIMEOUT_SECS",
    "lb_service_timeout_secs",
);

impl MigrateConfig {
    /// Loads configuration without parsing CLI arguments. Values merge
    /// defaults, configuration files and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("pvmigrate")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    fn require_field(value: Option<&str>, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        match value {
            Some(present) if !present.trim().is_empty() => Ok(()),
            _ => Err(ConfigError::MissingField(format!(
                "missing {}: {}",
                metadata.description,
                metadata.hint()
            ))),
        }
    }

    fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "{} must be greater than zero: {}",
                metadata.description,
                metadata.hint()
            )));
        }
        Ok(())
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply the offending value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required value is empty
    /// and [`ConfigError::InvalidValue`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(self.chart.as_deref(), &CHART)?;
        Self::require_field(Some(&self.helm_bin), &HELM_BIN)?;
        Self::require_field(Some(&self.kubectl_bin), &KUBECTL_BIN)?;
        self.default_key_algorithm()?;
        Self::require_positive(self.install_timeout_secs, &INSTALL_TIMEOUT)?;
        Self::require_positive(self.lb_service_timeout_secs, &LB_SERVICE_TIMEOUT)?;
        Ok(())
    }

    /// Parses the configured key algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unsupported algorithms.
    pub fn default_key_algorithm(&self) -> Result<KeyAlgorithm, ConfigError> {
        self.key_algorithm
            .parse()
            .map_err(|err| ConfigError::InvalidValue(format!("{err}: {}", KEY_ALGORITHM.hint())))
    }

    /// Strategy timeouts derived from the configured values.
    #[must_use]
    pub fn strategy_settings(&self) -> StrategySettings {
        StrategySettings {
            install_timeout: Duration::from_secs(self.install_timeout_secs),
            address_timeout: Duration::from_secs(self.lb_service_timeout_secs),
            ..StrategySettings::default()
        }
    }

    /// Builds the `helm`/`kubectl` backed cluster client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn command_cluster(&self) -> Result<CommandCluster<ProcessCommandRunner>, ConfigError> {
        self.validate()?;
        let chart = self.chart.clone().unwrap_or_default();
        Ok(CommandCluster::with_process_runner(chart)
            .with_chart_version(self.chart_version.clone())
            .with_helm_bin(&self.helm_bin)
            .with_kubectl_bin(&self.kubectl_bin))
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::EnvGuard;
    use rstest::{fixture, rstest};

    #[fixture]
    fn valid_config() -> MigrateConfig {
        MigrateConfig {
            helm_bin: String::from("helm"),
            kubectl_bin: String::from("kubectl"),
            chart: Some(String::from("oci://charts.example.com/pv-migrate")),
            chart_version: None,
            key_algorithm: String::from("ed25519"),
            install_timeout_secs: 60,
            lb_service_timeout_secs: 120,
        }
    }

    #[rstest]
    fn valid_config_passes(valid_config: MigrateConfig) {
        assert_eq!(valid_config.validate(), Ok(()));
        assert_eq!(
            valid_config.default_key_algorithm(),
            Ok(KeyAlgorithm::Ed25519)
        );
    }

    #[rstest]
    #[case::chart(|cfg: &mut MigrateConfig| cfg.chart = None, "PVMIGRATE_CHART", "chart")]
    #[case::blank_chart(
        |cfg: &mut MigrateConfig| cfg.chart = Some(String::from("  ")),
        "PVMIGRATE_CHART",
        "chart"
    )]
    #[case::helm(|cfg: &mut MigrateConfig| cfg.helm_bin.clear(), "PVMIGRATE_HELM_BIN", "helm_bin")]
    #[case::kubectl(
        |cfg: &mut MigrateConfig| cfg.kubectl_bin.clear(),
        "PVMIGRATE_KUBECTL_BIN",
        "kubectl_bin"
    )]
    #[case::algorithm(
        |cfg: &mut MigrateConfig| cfg.key_algorithm = String::from("dsa"),
        "PVMIGRATE_KEY_ALGORITHM",
        "key_algorithm"
    )]
    #[case::install_timeout(
        |cfg: &mut MigrateConfig| cfg.install_timeout_secs = 0,
        "PVMIGRATE_INSTALL_TIMEOUT_SECS",
        "install_timeout_secs"
    )]
    #[case::lb_timeout(
        |cfg: &mut MigrateConfig| cfg.lb_service_timeout_secs = 0,
        "PVMIGRATE_LB_SERVICE_TIMEOUT_SECS",
        "lb_service_timeout_secs"
    )]
    fn validation_errors_are_actionable(
        valid_config: MigrateConfig,
        #[case] mutate: fn(&mut MigrateConfig),
        #[case] env_var: &str,
        #[case] toml_key: &str,
    ) {
        let mut cfg = valid_config;
        mutate(&mut cfg);

        let message = cfg
            .validate()
            .expect_err("validation should fail")
            .to_string();

        assert!(message.contains(env_var), "missing env var: {message}");
        assert!(message.contains(toml_key), "missing TOML key: {message}");
        assert!(message.contains("pvmigrate.toml"), "missing file: {message}");
    }

    #[rstest]
    fn settings_follow_configured_timeouts(valid_config: MigrateConfig) {
        let cfg = MigrateConfig {
            install_timeout_secs: 30,
            lb_service_timeout_secs: 300,
            ..valid_config
        };

        let settings = cfg.strategy_settings();

        assert_eq!(settings.install_timeout, Duration::from_secs(30));
        assert_eq!(settings.address_timeout, Duration::from_secs(300));
        assert_eq!(
            settings.job_poll_interval,
            StrategySettings::default().job_poll_interval
        );
    }

    #[rstest]
    fn command_cluster_requires_a_chart(valid_config: MigrateConfig) {
        let cfg = MigrateConfig {
            chart: None,
            ..valid_config
        };

        assert!(matches!(
            cfg.command_cluster(),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[tokio::test]
    async fn environment_overrides_defaults() {
        let _guard = EnvGuard::set_vars(&[
            ("PVMIGRATE_CHART", "./charts/pv-migrate"),
            ("PVMIGRATE_LB_SERVICE_TIMEOUT_SECS", "45"),
        ])
        .await;

        let cfg = MigrateConfig::load_without_cli_args().expect("config should load");

        assert_eq!(cfg.chart.as_deref(), Some("./charts/pv-migrate"));
        assert_eq!(cfg.lb_service_timeout_secs, 45);
        assert_eq!(cfg.install_timeout_secs, 60);
        assert_eq!(cfg.helm_bin, "helm");
        assert_eq!(cfg.key_algorithm, "ed25519");
    }
}
