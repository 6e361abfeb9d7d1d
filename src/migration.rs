//! Data model for a single volume migration run.
//!
//! A [`MigrationRun`] bundles the run identifier, both endpoint descriptors and
//! the option set. It lives for exactly one invocation and is never persisted.

use std::fmt;

use camino::Utf8PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::keys::KeyAlgorithm;
use crate::values::ReleaseValues;

/// Prefix shared by every release created by the tool.
pub const RELEASE_PREFIX: &str = "pv-migrate";

const RUN_ID_LEN: usize = 5;
const DEFAULT_PATH: &str = "/";

/// Side of the transfer an endpoint plays.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Role {
    /// Endpoint that exposes the volume being copied from.
    Source,
    /// Endpoint that receives the data and runs the transfer job.
    Destination,
}

impl Role {
    /// Suffix appended to the run's base release name for this role.
    #[must_use]
    pub const fn release_suffix(self) -> &'static str {
        match self {
            Self::Source => "src",
            Self::Destination => "dest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("source"),
            Self::Destination => f.write_str("destination"),
        }
    }
}

/// Identity of the cluster an endpoint lives in.
///
/// Both fields are optional; when unset the ambient kubeconfig and its
/// current context are used.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct ClusterTarget {
    /// Path to the kubeconfig file.
    pub kubeconfig: Option<Utf8PathBuf>,
    /// Context name inside the kubeconfig.
    pub context: Option<String>,
}

impl ClusterTarget {
    /// Creates a target using the given kubeconfig path and context.
    #[must_use]
    pub const fn new(kubeconfig: Option<Utf8PathBuf>, context: Option<String>) -> Self {
        Self {
            kubeconfig,
            context,
        }
    }
}

impl fmt::Display for ClusterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kubeconfig, &self.context) {
            (None, None) => f.write_str("default"),
            (Some(path), None) => write!(f, "{path}"),
            (None, Some(context)) => write!(f, "context {context}"),
            (Some(path), Some(context)) => write!(f, "{path} (context {context})"),
        }
    }
}

/// Describes one side of the migration. Immutable for the run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EndpointDescriptor {
    /// Cluster hosting the volume.
    pub cluster: ClusterTarget,
    /// Namespace of the volume claim.
    pub namespace: String,
    /// Name of the persistent volume claim.
    pub volume: String,
    /// Filesystem path inside the volume.
    pub path: String,
    /// Role this endpoint plays.
    pub role: Role,
}

impl EndpointDescriptor {
    /// Creates a descriptor rooted at `/` on the ambient cluster.
    #[must_use]
    pub fn new(role: Role, namespace: impl Into<String>, volume: impl Into<String>) -> Self {
        Self {
            cluster: ClusterTarget::default(),
            namespace: namespace.into(),
            volume: volume.into(),
            path: DEFAULT_PATH.to_owned(),
            role,
        }
    }

    /// Sets the cluster target.
    #[must_use]
    pub fn cluster(mut self, cluster: ClusterTarget) -> Self {
        self.cluster = cluster;
        self
    }

    /// Sets the path inside the volume.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    fn validate(&self, expected: Role) -> Result<(), MigrationError> {
        if self.role != expected {
            return Err(MigrationError::RoleMismatch {
                expected,
                actual: self.role,
            });
        }
        for (field, value) in [
            ("namespace", &self.namespace),
            ("volume", &self.volume),
            ("path", &self.path),
        ] {
            if value.trim().is_empty() {
                return Err(MigrationError::Validation(format!("{expected}.{field}")));
            }
        }
        Ok(())
    }
}

/// Tunables for a single run.
#[derive(Clone, Debug, Eq, PartialEq)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "each flag maps one-to-one onto a user-facing switch"
)]
pub struct MigrationOptions {
    /// Algorithm used for the transfer key pair.
    pub key_algorithm: KeyAlgorithm,
    /// Remove files on the destination that are absent on the source.
    pub delete_extraneous_files: bool,
    /// Skip preserving file ownership on the destination.
    pub no_chown: bool,
    /// Mount the source volume read-only.
    pub source_mount_read_only: bool,
    /// Render transfer progress while waiting for the job.
    pub show_progress: bool,
    /// User supplied template values applied after the computed ones.
    pub value_overrides: ReleaseValues,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            key_algorithm: KeyAlgorithm::default(),
            delete_extraneous_files: false,
            no_chown: false,
            source_mount_read_only: true,
            show_progress: true,
            value_overrides: ReleaseValues::new(),
        }
    }
}

/// Short random identifier for a run.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RunId(String);

impl RunId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(
            Uuid::new_v4()
                .simple()
                .to_string()
                .chars()
                .take(RUN_ID_LEN)
                .collect(),
        )
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One invocation of the migration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MigrationRun {
    id: RunId,
    source: EndpointDescriptor,
    destination: EndpointDescriptor,
    options: MigrationOptions,
}

impl MigrationRun {
    /// Creates a run with a freshly generated identifier.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError`] when a descriptor carries the wrong role or
    /// an empty field.
    pub fn new(
        source: EndpointDescriptor,
        destination: EndpointDescriptor,
        options: MigrationOptions,
    ) -> Result<Self, MigrationError> {
        Self::with_id(RunId::generate(), source, destination, options)
    }

    /// Creates a run with a caller supplied identifier.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError`] when validation fails.
    pub fn with_id(
        id: RunId,
        source: EndpointDescriptor,
        destination: EndpointDescriptor,
        options: MigrationOptions,
    ) -> Result<Self, MigrationError> {
        if id.as_str().trim().is_empty() {
            return Err(MigrationError::Validation(String::from("id")));
        }
        source.validate(Role::Source)?;
        destination.validate(Role::Destination)?;
        Ok(Self {
            id,
            source,
            destination,
            options,
        })
    }

    /// Run identifier.
    #[must_use]
    pub const fn id(&self) -> &RunId {
        &self.id
    }

    /// Source endpoint.
    #[must_use]
    pub const fn source(&self) -> &EndpointDescriptor {
        &self.source
    }

    /// Destination endpoint.
    #[must_use]
    pub const fn destination(&self) -> &EndpointDescriptor {
        &self.destination
    }

    /// Option set.
    #[must_use]
    pub const fn options(&self) -> &MigrationOptions {
        &self.options
    }

    /// Descriptor for `role`.
    #[must_use]
    pub const fn endpoint(&self, role: Role) -> &EndpointDescriptor {
        match role {
            Role::Source => &self.source,
            Role::Destination => &self.destination,
        }
    }

    /// Base name shared by both releases of this run.
    #[must_use]
    pub fn base_release_name(&self) -> String {
        format!("{RELEASE_PREFIX}-{}", self.id)
    }

    /// Release name used for the endpoint playing `role`.
    #[must_use]
    pub fn release_name(&self, role: Role) -> String {
        format!("{}-{}", self.base_release_name(), role.release_suffix())
    }

    /// Name of the load-balanced service fronting the source endpoint.
    #[must_use]
    pub fn source_service_name(&self) -> String {
        format!("{}-sshd", self.release_name(Role::Source))
    }

    /// Name of the transfer job created by the destination endpoint.
    #[must_use]
    pub fn transfer_job_name(&self) -> String {
        format!("{}-rsync", self.release_name(Role::Destination))
    }
}

/// Errors raised while assembling a [`MigrationRun`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MigrationError {
    /// Raised when a required field is empty.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when a descriptor is passed in the wrong slot.
    #[error("expected a {expected} endpoint, got a {actual} endpoint")]
    RoleMismatch {
        /// Role required by the slot.
        expected: Role,
        /// Role carried by the descriptor.
        actual: Role,
    },
}
