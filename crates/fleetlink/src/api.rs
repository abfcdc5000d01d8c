//! Typed access to the fleet API.
//!
//! Every failure to get a usable answer, whether the transport gave up, the
//! status was not 200, the content type was wrong or the body did not
//! decode, collapses into `None`. Callers decide what an absent answer means.

use std::sync::Arc;

use fleetlink_sync::{encode, FleetRequest, SyncError, Transport, TransportResponse};

use crate::retry::RetryInvoker;

/// Request/response access to the coordinator.
#[derive(Clone)]
pub struct FleetApi {
    transport: Arc<dyn Transport>,
    retry: Arc<RetryInvoker>,
}

impl FleetApi {
    pub fn new(transport: Arc<dyn Transport>, retry: Arc<RetryInvoker>) -> Self {
        Self { transport, retry }
    }

    pub fn retry(&self) -> &Arc<RetryInvoker> {
        &self.retry
    }

    /// Send `request`, retrying transport failures.
    pub async fn request<R: FleetRequest>(&self, request: &R) -> Option<R::Response> {
        self.send(request, true).await
    }

    /// Send `request` exactly once.
    pub async fn request_once<R: FleetRequest>(&self, request: &R) -> Option<R::Response> {
        self.send(request, false).await
    }

    async fn send<R: FleetRequest>(&self, request: &R, retry: bool) -> Option<R::Response> {
        let path = R::PATH;
        let body = match encode(request) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(path, error = %e, "failed to encode request");
                return None;
            }
        };

        let transport = &self.transport;
        let result = if retry {
            self.retry
                .invoke(|| transport.post(path, body.clone()))
                .await
        } else {
            transport.post(path, body).await
        };

        let response: TransportResponse = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(path, error = %e, "no response");
                return None;
            }
        };

        match response.into_response::<R::Response>() {
            Ok(decoded) => Some(decoded),
            Err(SyncError::UnexpectedContentType(None)) => {
                tracing::warn!(path, "[Node] POST /{}: missing header `Content-Type`", path);
                None
            }
            Err(SyncError::UnexpectedContentType(Some(content_type))) => {
                tracing::warn!(
                    path,
                    content_type = %content_type,
                    "[Node] POST /{}: header `Content-Type` has wrong value",
                    path
                );
                None
            }
            Err(e) => {
                tracing::debug!(path, error = %e, "unusable response");
                None
            }
        }
    }
}

impl std::fmt::Debug for FleetApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetApi")
            .field("max_tries", &self.retry.max_tries())
            .finish_non_exhaustive()
    }
}
