//! Node registration and teardown.
//!
//! [`NodeSession`] owns the node identity. It publishes the identity through
//! a watch channel; the heartbeat probe and the message exchange only ever
//! hold receivers. Registration and teardown are serialized by the mutex
//! around the heartbeat, so the keepalive runs exactly while a node id is
//! held.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use fleetlink_core::NodeId;
use fleetlink_sync::messages::{CreateNodeRequest, DeleteNodeRequest, SendNodeHeartbeatRequest};

use crate::api::FleetApi;
use crate::heartbeat::{HeartbeatProbe, HeartbeatSender, ProbeOutcome};

/// Sends heartbeats for whatever node is currently registered.
pub struct NodeProbe {
    api: FleetApi,
    node: watch::Receiver<Option<NodeId>>,
    heartbeat_interval: Duration,
}

impl NodeProbe {
    pub fn new(
        api: FleetApi,
        node: watch::Receiver<Option<NodeId>>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            api,
            node,
            heartbeat_interval,
        }
    }
}

#[async_trait]
impl HeartbeatProbe for NodeProbe {
    async fn probe(&self) -> ProbeOutcome {
        let node = *self.node.borrow();
        let Some(node) = node else {
            tracing::error!("Node instance missing");
            return ProbeOutcome::Unreachable;
        };

        let request = SendNodeHeartbeatRequest {
            node,
            heartbeat_interval: self.heartbeat_interval.as_secs_f64(),
        };
        match self.api.request_once(&request).await {
            None => ProbeOutcome::Unreachable,
            Some(response) if response.success => ProbeOutcome::Alive,
            Some(_) => ProbeOutcome::Rejected,
        }
    }
}

/// Registers and unregisters this node with the coordinator.
pub struct NodeSession {
    api: FleetApi,
    node: Arc<watch::Sender<Option<NodeId>>>,
    heartbeat: Mutex<HeartbeatSender>,
    rejected: watch::Receiver<bool>,
    heartbeat_interval: Duration,
}

impl NodeSession {
    /// A session whose heartbeat reports to the coordinator behind `api`.
    pub fn new(api: FleetApi, heartbeat_interval: Duration) -> Self {
        let (node, node_rx) = watch::channel(None);
        let probe = Arc::new(NodeProbe::new(api.clone(), node_rx, heartbeat_interval));
        let heartbeat = HeartbeatSender::new(probe, heartbeat_interval);
        let rejected = heartbeat.rejection();
        Self {
            api,
            node: Arc::new(node),
            heartbeat: Mutex::new(heartbeat),
            rejected,
            heartbeat_interval,
        }
    }

    /// The registered node, if any.
    pub fn node_id(&self) -> Option<NodeId> {
        *self.node.borrow()
    }

    /// Read-only view of the node identity.
    pub fn identity(&self) -> watch::Receiver<Option<NodeId>> {
        self.node.subscribe()
    }

    /// Raised once the coordinator rejects a heartbeat.
    pub fn rejection(&self) -> watch::Receiver<bool> {
        self.rejected.clone()
    }

    pub async fn heartbeat_running(&self) -> bool {
        self.heartbeat.lock().await.is_running()
    }

    /// Register with the coordinator and start the heartbeat.
    ///
    /// Returns the existing id without registering again if a node is
    /// already registered.
    pub async fn create_node(&self) -> Option<NodeId> {
        let mut heartbeat = self.heartbeat.lock().await;

        if let Some(node) = self.node_id() {
            tracing::warn!(node_id = %node, "node already registered");
            return Some(node);
        }

        let request = CreateNodeRequest {
            heartbeat_interval: self.heartbeat_interval.as_secs_f64(),
        };
        let Some(response) = self.api.request(&request).await else {
            tracing::error!("failed to register node");
            return None;
        };

        let node = response.node;
        self.node.send_replace(Some(node));
        heartbeat.start();
        tracing::info!(node_id = %node, "node registered");
        Some(node)
    }

    /// Stop the heartbeat, unregister, and forget the node id.
    ///
    /// The id is cleared even if the coordinator cannot be reached.
    pub async fn delete_node(&self) {
        let mut heartbeat = self.heartbeat.lock().await;

        let Some(node) = self.node_id() else {
            tracing::error!("Node instance missing");
            return;
        };

        heartbeat.stop().await;

        if self.api.request(&DeleteNodeRequest { node }).await.is_none() {
            tracing::warn!(node_id = %node, "failed to unregister node");
        }

        self.node.send_replace(None);
        tracing::info!(node_id = %node, "node deleted");
    }
}

impl std::fmt::Debug for NodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSession")
            .field("node_id", &self.node_id())
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use bytes::Bytes;
    use fleetlink_sync::messages::{
        paths, CreateNodeResponse, DeleteNodeResponse, SendNodeHeartbeatResponse,
    };
    use fleetlink_sync::{encode, SyncError, Transport, TransportResponse};

    use crate::retry::{RetryConfig, RetryInvoker};

    /// Answers registration with node 7, counting requests per path.
    struct RegistryTransport {
        accept_heartbeat: bool,
        reachable: bool,
        hits: StdMutex<HashMap<&'static str, usize>>,
    }

    impl RegistryTransport {
        fn new(accept_heartbeat: bool) -> Arc<Self> {
            Arc::new(Self {
                accept_heartbeat,
                reachable: true,
                hits: StdMutex::new(HashMap::new()),
            })
        }

        fn hits(&self, path: &str) -> usize {
            self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Transport for RegistryTransport {
        async fn post(&self, path: &str, _body: Bytes) -> fleetlink_sync::Result<TransportResponse> {
            if !self.reachable {
                return Err(SyncError::TransportError("unreachable".into()));
            }
            let body = match path {
                paths::CREATE_NODE => {
                    *self.hits.lock().unwrap().entry(paths::CREATE_NODE).or_default() += 1;
                    encode(&CreateNodeResponse { node: NodeId(7) })?
                }
                paths::DELETE_NODE => {
                    *self.hits.lock().unwrap().entry(paths::DELETE_NODE).or_default() += 1;
                    encode(&DeleteNodeResponse {})?
                }
                paths::SEND_NODE_HEARTBEAT => {
                    *self
                        .hits
                        .lock()
                        .unwrap()
                        .entry(paths::SEND_NODE_HEARTBEAT)
                        .or_default() += 1;
                    encode(&SendNodeHeartbeatResponse {
                        success: self.accept_heartbeat,
                    })?
                }
                _ => return Ok(TransportResponse::status(404)),
            };
            Ok(TransportResponse::ok(body))
        }
    }

    fn session(transport: Arc<RegistryTransport>) -> NodeSession {
        let retry = RetryInvoker::new(
            RetryConfig::default()
                .with_max_tries(Some(1))
                .with_jitter(false),
        );
        NodeSession::new(
            FleetApi::new(transport, Arc::new(retry)),
            Duration::from_secs(30),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_and_delete_node() {
        let transport = RegistryTransport::new(true);
        let session = session(transport.clone());
        assert!(!session.heartbeat_running().await);

        assert_eq!(session.create_node().await, Some(NodeId(7)));
        assert_eq!(session.node_id(), Some(NodeId(7)));
        assert!(session.heartbeat_running().await);

        tokio::time::sleep(Duration::from_secs(65)).await;
        // t = 0, 30, 60
        assert_eq!(transport.hits(paths::SEND_NODE_HEARTBEAT), 3);

        session.delete_node().await;
        assert_eq!(session.node_id(), None);
        assert!(!session.heartbeat_running().await);
        assert_eq!(transport.hits(paths::DELETE_NODE), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(transport.hits(paths::SEND_NODE_HEARTBEAT), 3);
    }

    #[tokio::test]
    async fn test_create_node_twice_keeps_identity() {
        let transport = RegistryTransport::new(true);
        let session = session(transport.clone());

        session.create_node().await;
        assert_eq!(session.create_node().await, Some(NodeId(7)));
        assert_eq!(transport.hits(paths::CREATE_NODE), 1);

        session.delete_node().await;
    }

    #[tokio::test]
    async fn test_create_node_failure_starts_nothing() {
        let transport = Arc::new(RegistryTransport {
            accept_heartbeat: true,
            reachable: false,
            hits: StdMutex::new(HashMap::new()),
        });
        let session = session(transport);

        assert_eq!(session.create_node().await, None);
        assert_eq!(session.node_id(), None);
        assert!(!session.heartbeat_running().await);
    }

    #[tokio::test]
    async fn test_delete_without_node_is_noop() {
        let transport = RegistryTransport::new(true);
        let session = session(transport.clone());

        session.delete_node().await;
        assert_eq!(transport.hits(paths::DELETE_NODE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_heartbeat_raises_flag() {
        let transport = RegistryTransport::new(false);
        let session = session(transport);
        let mut rejection = session.rejection();

        session.create_node().await;
        rejection.wait_for(|rejected| *rejected).await.unwrap();
        assert!(!session.heartbeat_running().await);

        // Identity stays until teardown
        assert_eq!(session.node_id(), Some(NodeId(7)));
        assert!(*session.rejection().borrow());
        session.delete_node().await;
        assert_eq!(session.node_id(), None);
    }

    #[tokio::test]
    async fn test_probe_without_identity_is_unreachable() {
        let transport = RegistryTransport::new(true);
        let api = FleetApi::new(transport.clone(), Arc::new(RetryInvoker::default()));
        let (_node, node_rx) = watch::channel(None);

        let probe = NodeProbe::new(api, node_rx, Duration::from_secs(30));
        assert_eq!(probe.probe().await, ProbeOutcome::Unreachable);
        assert_eq!(transport.hits(paths::SEND_NODE_HEARTBEAT), 0);
    }
}
