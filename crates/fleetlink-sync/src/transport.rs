//! Transport abstraction for the fleet API.
//!
//! A transport delivers one POST per call and hands back the raw response.
//! Implementations may use HTTP or anything else; the in-memory coordinator
//! used in tests is one as well.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, SyncError};
use crate::messages::{decode, encode, FleetRequest};

/// Media type of every request and response body.
pub const CONTENT_TYPE: &str = "application/cbor";

/// A raw response as received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl TransportResponse {
    /// A 200 response carrying a CBOR body.
    pub fn ok(body: Bytes) -> Self {
        Self {
            status: 200,
            content_type: Some(CONTENT_TYPE.to_string()),
            body,
        }
    }

    /// An empty response with the given status.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: Bytes::new(),
        }
    }

    /// Check status and content type, then decode the body.
    pub fn into_response<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        if self.status != 200 {
            return Err(SyncError::UnexpectedStatus(self.status));
        }
        match self.content_type.as_deref() {
            Some(ct) if is_cbor(ct) => decode(&self.body),
            _ => Err(SyncError::UnexpectedContentType(self.content_type)),
        }
    }
}

/// Whether a content-type header names CBOR, ignoring parameters.
pub fn is_cbor(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|media| media.trim().eq_ignore_ascii_case(CONTENT_TYPE))
        .unwrap_or(false)
}

/// Transport trait for posting fleet requests.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `body` to `path` and return whatever came back.
    ///
    /// An `Err` means no response was received at all.
    async fn post(&self, path: &str, body: Bytes) -> Result<TransportResponse>;
}

/// Encode `request`, post it to its path, and decode the typed response.
pub async fn call<R: FleetRequest>(transport: &dyn Transport, request: &R) -> Result<R::Response> {
    let body = encode(request)?;
    transport.post(R::PATH, body).await?.into_response()
}
