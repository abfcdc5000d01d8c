//! Error types for the sync module.

use fleetlink_core::{CoreError, ObjectId};
use thiserror::Error;

/// Errors that can occur during fleet requests and object sync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport-level error (no response at all).
    #[error("transport error: {0}")]
    TransportError(String),

    /// The server answered with something other than 200.
    #[error("unexpected status code {0}")]
    UnexpectedStatus(u16),

    /// The response was not labelled as CBOR.
    #[error("unexpected content type: {0:?}")]
    UnexpectedContentType(Option<String>),

    /// Request could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Response body could not be decoded.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// The coordinator could not provide an object.
    #[error("object {0} unavailable")]
    ObjectUnavailable(ObjectId),

    /// Fetched bytes do not hash to the requested id.
    #[error("content mismatch for object {expected}: got {actual}")]
    ContentMismatch { expected: ObjectId, actual: ObjectId },

    /// The coordinator declined a pushed message.
    #[error("message {message_id} declined with code {code}")]
    Declined { message_id: ObjectId, code: u32 },

    /// A background fetch/store task failed to complete.
    #[error("sync task failed: {0}")]
    TaskFailed(String),

    /// Object model error.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl SyncError {
    /// Whether this error means the object graph itself is unusable.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            SyncError::ObjectUnavailable(_)
                | SyncError::ContentMismatch { .. }
                | SyncError::Core(_)
        )
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
