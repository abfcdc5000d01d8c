//! Fleet API message types.
//!
//! Every endpoint takes one request and answers with one response, both
//! CBOR-encoded. [`FleetRequest`] ties each request type to its response
//! type and its path, so a caller cannot post a request to the wrong place
//! or decode the wrong answer.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use fleetlink_core::{Bundle, MessageEnvelope, NodeId, ObjectId, ObjectTree, Run, RunId};

use crate::error::{Result, SyncError};

/// Endpoint paths, relative to the server address.
pub mod paths {
    pub const CREATE_NODE: &str = "api/v0/fleet/create-node";
    pub const DELETE_NODE: &str = "api/v0/fleet/delete-node";
    pub const SEND_NODE_HEARTBEAT: &str = "api/v0/fleet/send-node-heartbeat";
    pub const PULL_MESSAGES: &str = "api/v0/fleet/pull-messages";
    pub const PUSH_MESSAGES: &str = "api/v0/fleet/push-messages";
    pub const PULL_OBJECT: &str = "api/v0/fleet/pull-object";
    pub const PUSH_OBJECT: &str = "api/v0/fleet/push-object";
    pub const CONFIRM_MESSAGE_RECEIVED: &str = "api/v0/fleet/confirm-message-received";
    pub const GET_RUN: &str = "api/v0/fleet/get-run";
    pub const GET_BUNDLE: &str = "api/v0/fleet/get-bundle";
}

/// A request to one fleet endpoint.
pub trait FleetRequest: Serialize + Send + Sync {
    /// What the endpoint answers with.
    type Response: DeserializeOwned + Send;

    /// Where the request is posted.
    const PATH: &'static str;
}

/// Encode a request or response body.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| SyncError::Encoding(e.to_string()))?;
    Ok(Bytes::from(buf))
}

/// Decode a request or response body.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| SyncError::Decoding(e.to_string()))
}

macro_rules! fleet_request {
    ($request:ty => $response:ty, $path:expr) => {
        impl FleetRequest for $request {
            type Response = $response;
            const PATH: &'static str = $path;
        }
    };
}

// Node lifecycle

/// Register a node. The heartbeat interval is in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNodeRequest {
    pub heartbeat_interval: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateNodeResponse {
    pub node: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteNodeRequest {
    pub node: NodeId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteNodeResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendNodeHeartbeatRequest {
    pub node: NodeId,
    pub heartbeat_interval: f64,
}

/// `success: false` means the coordinator no longer accepts this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendNodeHeartbeatResponse {
    pub success: bool,
}

// Messages

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullMessagesRequest {
    pub node: NodeId,
}

/// At most one message is handed out per pull; `message_object_trees[i]`
/// describes `messages[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullMessagesResponse {
    pub messages: Vec<MessageEnvelope>,
    pub message_object_trees: Vec<ObjectTree>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessagesRequest {
    pub node: NodeId,
    pub messages: Vec<MessageEnvelope>,
    pub message_object_trees: Vec<ObjectTree>,
}

/// Per-message status code; zero means accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResult {
    pub message_id: ObjectId,
    pub code: u32,
}

/// Objects of one announced message the coordinator does not hold yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingObjects {
    pub message_id: ObjectId,
    pub object_ids: Vec<ObjectId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessagesResponse {
    pub results: Vec<PushResult>,
    pub objects_to_push: Vec<MissingObjects>,
}

impl PushMessagesResponse {
    /// The missing object ids announced for `message_id`.
    pub fn missing_for(&self, message_id: &ObjectId) -> &[ObjectId] {
        self.objects_to_push
            .iter()
            .find(|m| m.message_id == *message_id)
            .map(|m| m.object_ids.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmMessageReceivedRequest {
    pub node: NodeId,
    pub run_id: RunId,
    pub message_object_id: ObjectId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmMessageReceivedResponse {}

// Objects

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullObjectRequest {
    pub node: NodeId,
    pub run_id: RunId,
    pub object_id: ObjectId,
}

/// `object_found` without `object_available` means the object is known but
/// its bytes have not been uploaded yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullObjectResponse {
    pub object_found: bool,
    pub object_available: bool,
    pub object_content: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushObjectRequest {
    pub node: NodeId,
    pub run_id: RunId,
    pub object_id: ObjectId,
    pub object_content: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushObjectResponse {
    pub stored: bool,
}

// Run metadata

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRunRequest {
    pub node: Option<NodeId>,
    pub run_id: RunId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetRunResponse {
    pub run: Run,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBundleRequest {
    pub node: Option<NodeId>,
    pub hash: String,
    pub run_id: Option<RunId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBundleResponse {
    pub bundle: Bundle,
}

fleet_request!(CreateNodeRequest => CreateNodeResponse, paths::CREATE_NODE);
fleet_request!(DeleteNodeRequest => DeleteNodeResponse, paths::DELETE_NODE);
fleet_request!(SendNodeHeartbeatRequest => SendNodeHeartbeatResponse, paths::SEND_NODE_HEARTBEAT);
fleet_request!(PullMessagesRequest => PullMessagesResponse, paths::PULL_MESSAGES);
fleet_request!(PushMessagesRequest => PushMessagesResponse, paths::PUSH_MESSAGES);
fleet_request!(
    ConfirmMessageReceivedRequest => ConfirmMessageReceivedResponse,
    paths::CONFIRM_MESSAGE_RECEIVED
);
fleet_request!(PullObjectRequest => PullObjectResponse, paths::PULL_OBJECT);
fleet_request!(PushObjectRequest => PushObjectResponse, paths::PUSH_OBJECT);
fleet_request!(GetRunRequest => GetRunResponse, paths::GET_RUN);
fleet_request!(GetBundleRequest => GetBundleResponse, paths::GET_BUNDLE);

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlink_core::{message_type, Message, Metadata, RecordDict};

    #[test]
    fn test_paths_are_relative() {
        for path in [
            CreateNodeRequest::PATH,
            DeleteNodeRequest::PATH,
            SendNodeHeartbeatRequest::PATH,
            PullMessagesRequest::PATH,
            PushMessagesRequest::PATH,
            PullObjectRequest::PATH,
            PushObjectRequest::PATH,
            ConfirmMessageReceivedRequest::PATH,
            GetRunRequest::PATH,
            GetBundleRequest::PATH,
        ] {
            assert!(path.starts_with("api/v0/fleet/"), "{path}");
        }
    }

    #[test]
    fn test_pull_messages_response_roundtrip() {
        let message = Message::new(
            Metadata::new(4, NodeId::COORDINATOR, NodeId(7), message_type::TRAIN),
            RecordDict::new(),
        );
        let id = message.object_id();
        let response = PullMessagesResponse {
            messages: vec![message.envelope(id)],
            message_object_trees: vec![ObjectTree::leaf(id)],
        };

        let bytes = encode(&response).unwrap();
        let decoded: PullMessagesResponse = decode(&bytes).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_object_content_roundtrip() {
        let request = PushObjectRequest {
            node: NodeId(7),
            run_id: 1,
            object_id: ObjectId::compute(b"chunk"),
            object_content: Bytes::from_static(b"chunk"),
        };
        let decoded: PushObjectRequest = decode(&encode(&request).unwrap()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_empty_response_decodes() {
        let bytes = encode(&DeleteNodeResponse {}).unwrap();
        let _: DeleteNodeResponse = decode(&bytes).unwrap();
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode::<CreateNodeResponse>(b"\xff\x00garbage").unwrap_err();
        assert!(matches!(err, SyncError::Decoding(_)));
    }

    #[test]
    fn test_missing_for() {
        let a = ObjectId::compute(b"a");
        let b = ObjectId::compute(b"b");
        let response = PushMessagesResponse {
            results: vec![],
            objects_to_push: vec![MissingObjects {
                message_id: a,
                object_ids: vec![b],
            }],
        };
        assert_eq!(response.missing_for(&a), &[b]);
        assert!(response.missing_for(&b).is_empty());
    }
}
