//! Message exchange with the coordinator.
//!
//! `receive` pulls the next pending message and reassembles it from its
//! objects. `send` deflates a message once, announces its tree, and uploads
//! whatever objects the coordinator reports missing.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use fleetlink_core::{inflate_message, FrozenObjects, Message, NodeId, ObjectId};
use fleetlink_sync::messages::{
    ConfirmMessageReceivedRequest, PullMessagesRequest, PullObjectRequest, PushMessagesRequest,
    PushObjectRequest,
};
use fleetlink_sync::{
    ObjectContext, ObjectFetcher, ObjectStorer, ObjectSync, PushReport, SyncConfig, SyncError,
};

use crate::api::FleetApi;

/// Object transfer through the fleet API, bound to one node and run.
#[derive(Debug, Clone)]
pub struct RemoteObjects {
    api: FleetApi,
    context: ObjectContext,
}

impl RemoteObjects {
    pub fn new(api: FleetApi, context: ObjectContext) -> Self {
        Self { api, context }
    }
}

#[async_trait]
impl ObjectFetcher for RemoteObjects {
    async fn fetch(&self, object_id: ObjectId) -> Option<Bytes> {
        let request = PullObjectRequest {
            node: self.context.node,
            run_id: self.context.run_id,
            object_id,
        };
        let response = self.api.request(&request).await?;
        if !response.object_found {
            tracing::debug!(object_id = %object_id, "object not found");
            return None;
        }
        if !response.object_available {
            tracing::debug!(object_id = %object_id, "object not available yet");
            return None;
        }
        Some(response.object_content)
    }
}

#[async_trait]
impl ObjectStorer for RemoteObjects {
    async fn store(&self, object_id: ObjectId, content: Bytes) -> bool {
        let request = PushObjectRequest {
            node: self.context.node,
            run_id: self.context.run_id,
            object_id,
            object_content: content,
        };
        match self.api.request(&request).await {
            Some(response) => response.stored,
            None => false,
        }
    }
}

/// Receives and sends messages for the registered node.
#[derive(Debug)]
pub struct MessageExchange {
    api: FleetApi,
    node: watch::Receiver<Option<NodeId>>,
    sync: ObjectSync,
}

impl MessageExchange {
    pub fn new(api: FleetApi, node: watch::Receiver<Option<NodeId>>, config: SyncConfig) -> Self {
        Self {
            api,
            node,
            sync: ObjectSync::new(config),
        }
    }

    fn current_node(&self) -> Option<NodeId> {
        *self.node.borrow()
    }

    fn objects(&self, node: NodeId, run_id: u64) -> Arc<RemoteObjects> {
        Arc::new(RemoteObjects::new(
            self.api.clone(),
            ObjectContext::new(node, run_id),
        ))
    }

    /// Receive the next message addressed to this node.
    ///
    /// `None` if there is no session, nothing is pending, the message is for
    /// another node, or any of its objects could not be pulled and verified.
    ///
    /// The session identity is used as is. After a heartbeat rejection it is
    /// stale until `delete_node`, so callers outside `FleetClient::run` should
    /// watch `FleetClient::rejection` and tear down.
    pub async fn receive(&self) -> Option<Message> {
        let Some(node) = self.current_node() else {
            tracing::error!("Node instance missing");
            return None;
        };

        let response = self.api.request(&PullMessagesRequest { node }).await?;
        let envelope = response.messages.into_iter().next();
        let tree = response.message_object_trees.into_iter().next();
        let (envelope, tree) = match (envelope, tree) {
            (Some(envelope), Some(tree)) => (envelope, tree),
            (None, None) => {
                tracing::debug!(node_id = %node, "no message pending");
                return None;
            }
            _ => {
                tracing::warn!(
                    node_id = %node,
                    "pull-messages reply carries a message without its object tree"
                );
                return None;
            }
        };

        let metadata = &envelope.metadata;
        if metadata.dst_node_id != node {
            tracing::warn!(
                node_id = %node,
                dst_node_id = %metadata.dst_node_id,
                "discarding message addressed to another node"
            );
            return None;
        }

        let message_id = tree.object_id;
        if let Some(announced) = metadata.message_id {
            if announced != message_id {
                tracing::error!(
                    message_id = %announced,
                    tree_root = %message_id,
                    "message id does not match its object tree"
                );
                return None;
            }
        }

        let run_id = metadata.run_id;
        tracing::info!(node_id = %node, run_id, message_id = %message_id, "[Node] POST /pull-messages: success");

        let contents = match self.sync.pull(self.objects(node, run_id), &tree).await {
            Ok(contents) => contents,
            Err(e) if e.is_protocol_violation() => {
                // Left queued, so a later poll can retry once the objects are fixed
                tracing::warn!(message_id = %message_id, error = %e, "message objects missing or corrupt");
                return None;
            }
            Err(e) => {
                tracing::error!(message_id = %message_id, error = %e, "failed to pull message objects");
                return None;
            }
        };

        let message = match inflate_message(&message_id, &contents) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(message_id = %message_id, error = %e, "failed to inflate message");
                return None;
            }
        };

        let confirm = ConfirmMessageReceivedRequest {
            node,
            run_id,
            message_object_id: message_id,
        };
        if self.api.request(&confirm).await.is_none() {
            tracing::warn!(message_id = %message_id, "failed to confirm message receipt");
        }

        Some(message)
    }

    /// Send a message, uploading the objects the coordinator lacks.
    ///
    /// `None` if there is no session or the coordinator did not accept the
    /// message; nothing is uploaded for a declined message. Like `receive`,
    /// this does not check for a heartbeat rejection.
    pub async fn send(&self, message: &Message) -> Option<PushReport> {
        let Some(node) = self.current_node() else {
            tracing::error!("Node instance missing");
            return None;
        };

        // One deflation: the announced tree and the uploaded bytes agree
        let frozen = FrozenObjects::freeze(message);
        let message_id = frozen.root_id();
        let run_id = message.metadata.run_id;

        let request = PushMessagesRequest {
            node,
            messages: vec![message.envelope(message_id)],
            message_object_trees: vec![frozen.tree().clone()],
        };
        let Some(response) = self.api.request(&request).await else {
            tracing::error!(message_id = %message_id, "[Node] POST /push-messages: failed");
            return None;
        };

        if let Some(result) = response
            .results
            .iter()
            .find(|r| r.message_id == message_id && r.code != 0)
        {
            let declined = SyncError::Declined {
                message_id,
                code: result.code,
            };
            tracing::error!(error = %declined, "coordinator declined message");
            return None;
        }

        let missing = response.missing_for(&message_id);
        let report = self
            .sync
            .push(self.objects(node, run_id), frozen.objects(), missing)
            .await;

        if report.is_complete() {
            tracing::debug!(message_id = %message_id, pushed = report.pushed.len(), "pushed objects");
        } else {
            tracing::error!(
                message_id = %message_id,
                pushed = report.pushed.len(),
                failed = report.failed.len(),
                "some objects could not be pushed"
            );
        }
        Some(report)
    }
}
