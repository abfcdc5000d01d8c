//! HTTP transport for the fleet API.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE as CONTENT_TYPE_HEADER};
use reqwest::{Certificate, Client};

use fleetlink_sync::{SyncError, Transport, TransportResponse, CONTENT_TYPE};

use crate::config::{ClientConfig, RootCertificates};
use crate::error::{ClientError, Result};

/// Posts CBOR bodies to `{server_address}/{path}`.
///
/// Certificate verification is never disabled. There is no request timeout;
/// cancellation is left to the caller.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        tracing::warn!(
            "EXPERIMENTAL: the HTTP fleet transport is an experimental feature, \
             it might change considerably in future versions"
        );

        let mut builder = Client::builder();
        match &config.root_certificates {
            Some(RootCertificates::Path(path)) => {
                let pem = std::fs::read(path)?;
                let certificate = Certificate::from_pem(&pem)
                    .map_err(|e| ClientError::Certificate(format!("{}: {e}", path.display())))?;
                builder = builder.add_root_certificate(certificate);
            }
            Some(RootCertificates::Pem(_)) => {
                tracing::error!(
                    "For the HTTP transport, the root certificates must be provided as a path \
                     to a PEM file."
                );
            }
            None => {}
        }

        if config.authentication_keys.is_some() {
            tracing::error!("Client authentication is not supported for this transport type.");
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.server_address.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, path: &str, body: Bytes) -> fleetlink_sync::Result<TransportResponse> {
        let response = self
            .client
            .post(self.url(path))
            .header(ACCEPT, CONTENT_TYPE)
            .header(CONTENT_TYPE_HEADER, CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| SyncError::TransportError(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::TransportError(e.to_string()))?;

        Ok(TransportResponse {
            status,
            content_type,
            body,
        })
    }
}
