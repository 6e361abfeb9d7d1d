//! Discovers the externally reachable address of the source endpoint.
//!
//! The load balancer assigns the address asynchronously, so the resolver polls
//! the service until an address shows up or the deadline passes. Host
//! formatting lives here too because every consumer of the address embeds it
//! in a connection string.

use std::net::Ipv6Addr;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, info, warn};

use crate::cluster::Cluster;
use crate::migration::ClusterTarget;

/// Default delay between address lookups.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default time allowed for the load balancer to assign an address.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors raised while waiting for an external address.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum AddressResolutionError {
    /// Raised when no address is assigned before the deadline.
    #[error(
        "service {namespace}/{service} received no external address within {timeout_secs}s{}",
        last_error.as_ref().map(|err| format!(" (last error: {err})")).unwrap_or_default()
    )]
    Timeout {
        /// Namespace of the service.
        namespace: String,
        /// Service name.
        service: String,
        /// Deadline that elapsed, in seconds.
        timeout_secs: u64,
        /// Last lookup error observed while polling, if any.
        last_error: Option<String>,
    },
}

/// Polls a load-balanced service until it has an external address.
#[derive(Debug)]
pub struct AddressResolver<'a, C: ?Sized> {
    cluster: &'a C,
    poll_interval: Duration,
    timeout: Duration,
}

impl<'a, C: Cluster + ?Sized> AddressResolver<'a, C> {
    /// Creates a resolver with the default interval and timeout.
    #[must_use]
    pub const fn new(cluster: &'a C) -> Self {
        Self {
            cluster,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    /// Overrides the delay between lookups.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Overrides the overall deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Waits for `service` in `namespace` to receive an external address.
    ///
    /// The returned address is not host-formatted; pass it through
    /// [`format_host`] before building a connection string.
    ///
    /// # Errors
    ///
    /// Returns [`AddressResolutionError::Timeout`] when the deadline passes
    /// without an address. Lookup errors are retried until then.
    pub async fn resolve(
        &self,
        target: &ClusterTarget,
        namespace: &str,
        service: &str,
    ) -> Result<String, AddressResolutionError> {
        // An unrepresentable timeout means no deadline.
        let deadline = Instant::now().checked_add(self.timeout);
        let mut last_error = None;

        loop {
            let lookup = self
                .cluster
                .service_external_address(target, namespace, service);
            let outcome = match deadline {
                Some(deadline) => {
                    if let Ok(outcome) = timeout_at(deadline, lookup).await {
                        outcome
                    } else {
                        warn!(namespace, service, "service lookup outlived the deadline");
                        last_error =
                            Some(String::from("service lookup did not complete in time"));
                        break;
                    }
                }
                None => lookup.await,
            };

            match outcome {
                Ok(Some(address)) => {
                    info!(namespace, service, %address, "service address assigned");
                    return Ok(address);
                }
                Ok(None) => debug!(namespace, service, "service has no external address yet"),
                Err(err) => {
                    warn!(namespace, service, error = %err, "service lookup failed");
                    last_error = Some(err.to_string());
                }
            }

            if let Some(deadline) = deadline
                && Instant::now()
                    .checked_add(self.poll_interval)
                    .is_none_or(|next| next > deadline)
            {
                break;
            }
            sleep(self.poll_interval).await;
        }

        Err(AddressResolutionError::Timeout {
            namespace: namespace.to_owned(),
            service: service.to_owned(),
            timeout_secs: self.timeout.as_secs(),
            last_error,
        })
    }
}

/// Formats `address` for use as the host part of a connection string.
///
/// Literal IPv6 addresses are wrapped in square brackets. IPv4 literals,
/// hostnames and already-bracketed IPv6 literals are returned unchanged.
#[must_use]
pub fn format_host(address: &str) -> String {
    if address.parse::<Ipv6Addr>().is_ok() {
        format!("[{address}]")
    } else {
        address.to_owned()
    }
}
