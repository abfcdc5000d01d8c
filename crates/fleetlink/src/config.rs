//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use fleetlink_core::Keypair;
use fleetlink_sync::SyncConfig;

use crate::error::{ClientError, Result};
use crate::retry::RetryConfig;

/// Default address of the coordinator's fleet API.
pub const DEFAULT_SERVER_ADDRESS: &str = "http://127.0.0.1:9095";

/// Default interval between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default maximum message length, 512 MiB.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 536_870_912;

/// Trust anchors for the server's certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootCertificates {
    /// Path to a PEM file.
    Path(PathBuf),
    /// PEM bytes. The HTTP transport only accepts a path and ignores these.
    Pem(Vec<u8>),
}

/// Configuration for a [`FleetClient`](crate::FleetClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the fleet API, e.g. `https://coordinator:9095`.
    pub server_address: String,
    /// Extra root certificates. Verification is always on.
    pub root_certificates: Option<RootCertificates>,
    /// Node authentication keys, unsupported over HTTP.
    pub authentication_keys: Option<Keypair>,
    /// Interval between heartbeats, also announced at registration.
    pub heartbeat_interval: Duration,
    /// Accepted for parity with other transports; not enforced over HTTP.
    pub max_message_length: usize,
    /// Retry policy for every request except heartbeats.
    pub retry: RetryConfig,
    /// Object transfer settings.
    pub sync: SyncConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: DEFAULT_SERVER_ADDRESS.to_string(),
            root_certificates: None,
            authentication_keys: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            retry: RetryConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(server_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            ..Default::default()
        }
    }

    pub fn with_root_certificates(mut self, root_certificates: RootCertificates) -> Self {
        self.root_certificates = Some(root_certificates);
        self
    }

    pub fn with_authentication_keys(mut self, keys: Keypair) -> Self {
        self.authentication_keys = Some(keys);
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_max_message_length(mut self, max_message_length: usize) -> Self {
        self.max_message_length = max_message_length;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Reject configurations no transport could work with.
    pub fn validate(&self) -> Result<()> {
        if self.server_address.trim().is_empty() {
            return Err(ClientError::Config("server address is empty".into()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ClientError::Config("heartbeat interval must be positive".into()));
        }
        if self.sync.max_concurrent == 0 {
            return Err(ClientError::Config("max_concurrent must be positive".into()));
        }
        Ok(())
    }
}
