//! Error types for the fleet client.

use thiserror::Error;

/// Errors that can occur during client operations.
///
/// Most request failures are not errors: the fleet API reports them as
/// absent results. What remains here is either fatal to a session or a
/// problem building the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The coordinator no longer recognizes this node.
    #[error("heartbeat rejected: the coordinator does not recognize this node")]
    HeartbeatRejected,

    /// Root certificates could not be loaded.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// The HTTP client could not be built.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
