//! Error types for fleetlink core.

use thiserror::Error;

use crate::object::ObjectType;
use crate::types::ObjectId;

/// Errors that can occur while deflating or inflating objects.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("malformed object {id}: {reason}")]
    MalformedObject { id: ObjectId, reason: String },

    #[error("object {0} missing from contents")]
    MissingObject(ObjectId),

    #[error("object id mismatch: expected {expected}, got {actual}")]
    ObjectIdMismatch { expected: ObjectId, actual: ObjectId },

    #[error("object {id} has type {actual:?}, expected {expected:?}")]
    UnexpectedObjectType {
        id: ObjectId,
        expected: ObjectType,
        actual: ObjectType,
    },

    #[error("unknown object type tag: {0}")]
    UnknownObjectType(u64),
}

impl CoreError {
    pub(crate) fn malformed(id: ObjectId, reason: impl Into<String>) -> Self {
        CoreError::MalformedObject {
            id,
            reason: reason.into(),
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
