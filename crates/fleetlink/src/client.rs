//! The fleet client: one node's connection to the coordinator.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use fleetlink_core::{Bundle, Message, NodeId, Run, RunId};
use fleetlink_sync::messages::{GetBundleRequest, GetRunRequest};
use fleetlink_sync::{PushReport, Transport};

use crate::api::FleetApi;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::exchange::MessageExchange;
use crate::http::HttpTransport;
use crate::retry::RetryInvoker;
use crate::session::NodeSession;

/// A node's connection to the coordinator.
///
/// Provides a unified API for:
/// - Registering and unregistering the node
/// - Receiving instructions and sending replies
/// - Looking up runs and bundles
/// - Running work inside a session that always tears down
pub struct FleetClient {
    config: ClientConfig,
    api: FleetApi,
    session: NodeSession,
    exchange: MessageExchange,
}

enum ScopeExit<T> {
    Finished(anyhow::Result<T>),
    Rejected,
}

impl FleetClient {
    /// Create a client talking HTTP to `config.server_address`.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a client over an arbitrary transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let retry = Arc::new(RetryInvoker::new(config.retry.clone()));
        let api = FleetApi::new(transport, retry);
        let session = NodeSession::new(api.clone(), config.heartbeat_interval);
        let exchange = MessageExchange::new(api.clone(), session.identity(), config.sync.clone());
        Self {
            config,
            api,
            session,
            exchange,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The retry policy shared by all requests.
    pub fn retry(&self) -> &Arc<RetryInvoker> {
        self.api.retry()
    }

    /// The registered node, if any.
    pub fn node_id(&self) -> Option<NodeId> {
        self.session.node_id()
    }

    pub async fn heartbeat_running(&self) -> bool {
        self.session.heartbeat_running().await
    }

    /// Raised once the coordinator rejects a heartbeat; cleared when the next
    /// node is created.
    ///
    /// A rejected node id is stale, yet `receive` and `send` keep using it
    /// until `delete_node`. Outside [`FleetClient::run`], watch this and tear
    /// the session down.
    pub fn rejection(&self) -> watch::Receiver<bool> {
        self.session.rejection()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session
    // ─────────────────────────────────────────────────────────────────────────

    /// Register this node and start its heartbeat.
    pub async fn create_node(&self) -> Option<NodeId> {
        self.session.create_node().await
    }

    /// Stop the heartbeat and unregister this node.
    pub async fn delete_node(&self) {
        self.session.delete_node().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Receive the next message addressed to this node, if any.
    ///
    /// Does not check [`FleetClient::rejection`].
    pub async fn receive(&self) -> Option<Message> {
        self.exchange.receive().await
    }

    /// Send a message and upload the objects the coordinator lacks.
    ///
    /// Does not check [`FleetClient::rejection`].
    pub async fn send(&self, message: &Message) -> Option<PushReport> {
        self.exchange.send(message).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metadata
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch a run's metadata. An empty run if it could not be fetched.
    pub async fn get_run(&self, run_id: RunId) -> Run {
        let request = GetRunRequest {
            node: self.node_id(),
            run_id,
        };
        match self.api.request(&request).await {
            Some(response) => response.run,
            None => {
                tracing::warn!(run_id, "failed to fetch run");
                Run::empty(run_id)
            }
        }
    }

    /// Fetch a bundle by hash. An empty bundle if it could not be fetched or
    /// its content does not match the hash.
    pub async fn get_bundle(&self, hash: &str, run_id: Option<RunId>) -> Bundle {
        let request = GetBundleRequest {
            node: self.node_id(),
            hash: hash.to_string(),
            run_id,
        };
        let Some(response) = self.api.request(&request).await else {
            tracing::warn!(hash, "failed to fetch bundle");
            return Bundle::empty();
        };

        let bundle = response.bundle;
        if bundle.hash != hash || !bundle.verify() {
            tracing::error!(hash, received = %bundle.hash, "bundle content does not match its hash");
            return Bundle::empty();
        }
        bundle
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session scope
    // ─────────────────────────────────────────────────────────────────────────

    /// Run `f` with this client, then tear the session down.
    ///
    /// - If `f` returns `Ok`, the node is unregistered and the value is
    ///   returned.
    /// - If `f` fails, the error is logged, the node is unregistered, and
    ///   `Ok(None)` is returned.
    /// - If the coordinator rejects a heartbeat while `f` runs, `f` is
    ///   dropped, the node is unregistered, and
    ///   [`ClientError::HeartbeatRejected`] is returned.
    ///
    /// Teardown always makes a single attempt, so an unreachable coordinator
    /// cannot hold the scope open. A rejection raised before the scope began
    /// is ignored.
    pub async fn run<F, Fut, T>(self, f: F) -> Result<Option<T>>
    where
        F: FnOnce(Arc<FleetClient>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let client = Arc::new(self);
        let mut rejection = client.rejection();
        rejection.borrow_and_update();

        let exit = tokio::select! {
            result = f(Arc::clone(&client)) => ScopeExit::Finished(result),
            _ = wait_for_rejection(&mut rejection) => ScopeExit::Rejected,
        };

        client.retry().set_max_tries(Some(1));
        match exit {
            ScopeExit::Finished(Ok(value)) => {
                client.teardown().await;
                Ok(Some(value))
            }
            ScopeExit::Finished(Err(e)) => {
                tracing::error!(error = ?e, "session aborted");
                client.teardown().await;
                Ok(None)
            }
            ScopeExit::Rejected => {
                tracing::error!("session aborted: heartbeat rejected");
                client.teardown().await;
                Err(ClientError::HeartbeatRejected)
            }
        }
    }

    async fn teardown(&self) {
        if self.node_id().is_some() {
            self.delete_node().await;
        }
    }
}

/// Resolves on the next transition to rejected, not on a value already seen.
async fn wait_for_rejection(rejection: &mut watch::Receiver<bool>) {
    loop {
        if rejection.changed().await.is_err() {
            // Sender gone: no rejection can arrive any more
            std::future::pending::<()>().await;
        }
        if *rejection.borrow_and_update() {
            return;
        }
    }
}

impl std::fmt::Debug for FleetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetClient")
            .field("server_address", &self.config.server_address)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use fleetlink_sync::messages::{
        paths, CreateNodeResponse, DeleteNodeResponse, GetBundleResponse, GetRunResponse,
        SendNodeHeartbeatResponse,
    };
    use fleetlink_sync::{encode, SyncError, TransportResponse};

    use crate::retry::RetryConfig;

    /// A coordinator that knows node 7, one run and one bundle.
    struct StubCoordinator {
        accept_heartbeat: AtomicBool,
        reachable: AtomicBool,
        delete_calls: AtomicUsize,
        bundle: Mutex<Bundle>,
    }

    impl StubCoordinator {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                accept_heartbeat: AtomicBool::new(true),
                reachable: AtomicBool::new(true),
                delete_calls: AtomicUsize::new(0),
                bundle: Mutex::new(Bundle::new(b"bundle".to_vec())),
            })
        }
    }

    #[async_trait]
    impl Transport for StubCoordinator {
        async fn post(&self, path: &str, _body: Bytes) -> fleetlink_sync::Result<TransportResponse> {
            if path == paths::DELETE_NODE {
                self.delete_calls.fetch_add(1, Ordering::SeqCst);
            }
            if !self.reachable.load(Ordering::SeqCst) {
                return Err(SyncError::TransportError("unreachable".into()));
            }
            let body = match path {
                paths::CREATE_NODE => encode(&CreateNodeResponse { node: NodeId(7) })?,
                paths::DELETE_NODE => encode(&DeleteNodeResponse {})?,
                paths::SEND_NODE_HEARTBEAT => encode(&SendNodeHeartbeatResponse {
                    success: self.accept_heartbeat.load(Ordering::SeqCst),
                })?,
                paths::GET_RUN => {
                    let mut run = Run::empty(1);
                    run.bundle_id = "app".into();
                    run.bundle_hash = self.bundle.lock().unwrap().hash.clone();
                    encode(&GetRunResponse { run })?
                }
                paths::GET_BUNDLE => encode(&GetBundleResponse {
                    bundle: self.bundle.lock().unwrap().clone(),
                })?,
                _ => return Ok(TransportResponse::status(404)),
            };
            Ok(TransportResponse::ok(body))
        }
    }

    fn client(coordinator: Arc<StubCoordinator>) -> FleetClient {
        let config = ClientConfig::default()
            .with_heartbeat_interval(Duration::from_secs(10))
            .with_retry(
                RetryConfig::default()
                    .with_max_tries(Some(3))
                    .with_base_delay(Duration::from_millis(1))
                    .with_jitter(false),
            );
        FleetClient::with_transport(config, coordinator)
    }

    #[tokio::test]
    async fn test_get_run_and_bundle() {
        let coordinator = StubCoordinator::new();
        let client = client(coordinator.clone());

        let run = client.get_run(1).await;
        assert_eq!(run.bundle_id, "app");
        assert_eq!(client.get_run(1).await, run);

        let bundle = client.get_bundle(&run.bundle_hash, Some(1)).await;
        assert_eq!(bundle.content, Bytes::from_static(b"bundle"));
        assert_eq!(client.get_bundle(&run.bundle_hash, Some(1)).await, bundle);
    }

    #[tokio::test]
    async fn test_get_run_unreachable_is_empty() {
        let coordinator = StubCoordinator::new();
        coordinator.reachable.store(false, Ordering::SeqCst);
        let client = client(coordinator);

        assert!(client.get_run(4).await.is_empty());
        assert!(client.get_bundle("abc", None).await.is_empty());
    }

    #[tokio::test]
    async fn test_get_bundle_rejects_tampered_content() {
        let coordinator = StubCoordinator::new();
        let hash = coordinator.bundle.lock().unwrap().hash.clone();
        coordinator.bundle.lock().unwrap().content = Bytes::from_static(b"tampered");
        let client = client(coordinator);

        assert!(client.get_bundle(&hash, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_run_scope_tears_down() {
        let coordinator = StubCoordinator::new();
        let result = client(coordinator.clone())
            .run(|client| async move {
                let node = client.create_node().await;
                Ok(node)
            })
            .await
            .unwrap();

        assert_eq!(result, Some(Some(NodeId(7))));
        assert_eq!(coordinator.delete_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_scope_error_is_swallowed() {
        let coordinator = StubCoordinator::new();
        let result: Option<()> = client(coordinator.clone())
            .run(|client| async move {
                client.create_node().await;
                anyhow::bail!("training crashed")
            })
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(coordinator.delete_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_scope_single_attempt_teardown_on_error() {
        let coordinator = StubCoordinator::new();
        let scoped = coordinator.clone();
        let result: Option<()> = client(coordinator.clone())
            .run(|client| async move {
                client.create_node().await;
                scoped.reachable.store(false, Ordering::SeqCst);
                anyhow::bail!("lost the coordinator")
            })
            .await
            .unwrap();

        assert!(result.is_none());
        // Three tries allowed normally, one during teardown
        assert_eq!(coordinator.delete_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_scope_single_attempt_teardown_on_success() {
        let coordinator = StubCoordinator::new();
        let scoped = coordinator.clone();
        let result = client(coordinator.clone())
            .run(|client| async move {
                client.create_node().await;
                scoped.reachable.store(false, Ordering::SeqCst);
                Ok("done")
            })
            .await
            .unwrap();

        assert_eq!(result, Some("done"));
        assert_eq!(coordinator.delete_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_scope_ignores_earlier_rejection() {
        let coordinator = StubCoordinator::new();
        coordinator.accept_heartbeat.store(false, Ordering::SeqCst);
        let client = client(coordinator.clone());

        let mut rejection = client.rejection();
        client.create_node().await;
        rejection.wait_for(|rejected| *rejected).await.unwrap();
        client.delete_node().await;
        coordinator.accept_heartbeat.store(true, Ordering::SeqCst);

        let result = client
            .run(|client| async move {
                client.create_node().await;
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(client.heartbeat_running().await)
            })
            .await
            .unwrap();

        assert_eq!(result, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_scope_heartbeat_rejection() {
        let coordinator = StubCoordinator::new();
        coordinator.accept_heartbeat.store(false, Ordering::SeqCst);

        let result: Result<Option<()>> = client(coordinator.clone())
            .run(|client| async move {
                client.create_node().await;
                std::future::pending::<()>().await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ClientError::HeartbeatRejected)));
        assert_eq!(coordinator.delete_calls.load(Ordering::SeqCst), 1);
    }
}
