//! In-memory coordinator.
//!
//! Implements [`Transport`] by answering fleet requests from in-process
//! state, so real [`FleetClient`](fleetlink::FleetClient)s can be driven
//! end to end without a network. Every request is counted, and faults can be
//! injected per path or per object.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;

use fleetlink_core::{
    inflate_message, Bundle, FrozenObjects, Message, MessageEnvelope, NodeId, ObjectId,
    ObjectTree, Run, RunId,
};
use fleetlink_sync::messages::{
    paths, ConfirmMessageReceivedRequest, ConfirmMessageReceivedResponse, CreateNodeRequest,
    CreateNodeResponse, DeleteNodeRequest, DeleteNodeResponse, GetBundleRequest,
    GetBundleResponse, GetRunRequest, GetRunResponse, MissingObjects, PullMessagesRequest,
    PullMessagesResponse, PullObjectRequest, PullObjectResponse, PushMessagesRequest,
    PushMessagesResponse, PushObjectRequest, PushObjectResponse, PushResult,
    SendNodeHeartbeatRequest, SendNodeHeartbeatResponse,
};
use fleetlink_sync::{decode, encode, SyncError, Transport, TransportResponse};

/// A message waiting in a node's queue.
#[derive(Debug, Clone)]
struct Pending {
    envelope: MessageEnvelope,
    tree: ObjectTree,
}

#[derive(Debug, Default)]
struct State {
    next_node_id: u64,
    /// Registered nodes and the heartbeats each has sent.
    nodes: HashMap<NodeId, usize>,
    rejected_nodes: HashSet<NodeId>,
    queues: HashMap<NodeId, VecDeque<Pending>>,
    /// Messages pushed by nodes that were not routed to another node.
    inbox: Vec<Pending>,
    objects: HashMap<ObjectId, Bytes>,
    /// Announced in a pushed tree, not uploaded yet.
    announced: HashSet<ObjectId>,
    confirmations: Vec<ObjectId>,
    runs: HashMap<RunId, Run>,
    bundles: HashMap<String, Bundle>,

    requests: HashMap<String, usize>,
    object_pulls: HashMap<ObjectId, usize>,
    object_pushes: HashMap<ObjectId, usize>,

    unreachable: bool,
    failing_paths: HashSet<String>,
    failing_stores: HashSet<ObjectId>,
    decline_code: u32,
    content_type: Option<Option<String>>,
}

/// A coordinator living in memory.
#[derive(Debug)]
pub struct MemoryCoordinator {
    state: Mutex<State>,
}

impl MemoryCoordinator {
    /// Create a coordinator. Node ids are assigned from 1.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                next_node_id: 1,
                ..Default::default()
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Setup
    // ─────────────────────────────────────────────────────────────────────────

    /// Assign `node` to the next registering node, then count up from it.
    pub fn set_next_node_id(&self, node: u64) {
        self.state().next_node_id = node;
    }

    pub fn insert_run(&self, run: Run) {
        self.state().runs.insert(run.run_id, run);
    }

    pub fn insert_bundle(&self, bundle: Bundle) {
        self.state().bundles.insert(bundle.hash.clone(), bundle);
    }

    /// Queue `message` for its destination node, storing its objects.
    pub fn enqueue(&self, message: &Message) -> ObjectId {
        self.enqueue_to(message.metadata.dst_node_id, message)
    }

    /// Queue `message` for `node` regardless of its destination.
    pub fn enqueue_to(&self, node: NodeId, message: &Message) -> ObjectId {
        let (tree, objects) = FrozenObjects::freeze(message).into_parts();
        let message_id = tree.object_id;

        let mut state = self.state();
        state.objects.extend(objects);
        state.queues.entry(node).or_default().push_back(Pending {
            envelope: message.envelope(message_id),
            tree,
        });
        message_id
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fault injection
    // ─────────────────────────────────────────────────────────────────────────

    /// Fail every request at the transport level.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Answer requests to `path` with status 500.
    pub fn fail_path(&self, path: &str) {
        self.state().failing_paths.insert(path.to_string());
    }

    /// Refuse uploads of `object_id`.
    pub fn fail_store(&self, object_id: ObjectId) {
        self.state().failing_stores.insert(object_id);
    }

    /// Decline pushed messages with result `code`; zero accepts them again.
    pub fn decline_messages(&self, code: u32) {
        self.state().decline_code = code;
    }

    /// Answer heartbeats from `node` with `success: false`.
    pub fn reject_heartbeats(&self, node: NodeId) {
        self.state().rejected_nodes.insert(node);
    }

    /// Label every response with `content_type` instead of CBOR.
    pub fn set_content_type(&self, content_type: Option<&str>) {
        self.state().content_type = Some(content_type.map(str::to_string));
    }

    /// Forget a stored object.
    pub fn remove_object(&self, object_id: &ObjectId) {
        self.state().objects.remove(object_id);
    }

    /// Replace a stored object's bytes.
    pub fn corrupt_object(&self, object_id: &ObjectId) {
        self.state()
            .objects
            .insert(*object_id, Bytes::from_static(b"corrupted object"));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_registered(&self, node: NodeId) -> bool {
        self.state().nodes.contains_key(&node)
    }

    pub fn heartbeats(&self, node: NodeId) -> usize {
        self.state().nodes.get(&node).copied().unwrap_or(0)
    }

    /// Requests posted to `path`, failed ones included.
    pub fn requests(&self, path: &str) -> usize {
        self.state().requests.get(path).copied().unwrap_or(0)
    }

    pub fn object_pulls(&self, object_id: &ObjectId) -> usize {
        self.state().object_pulls.get(object_id).copied().unwrap_or(0)
    }

    pub fn object_pushes(&self, object_id: &ObjectId) -> usize {
        self.state().object_pushes.get(object_id).copied().unwrap_or(0)
    }

    pub fn total_object_pulls(&self) -> usize {
        self.state().object_pulls.values().sum()
    }

    pub fn total_object_pushes(&self) -> usize {
        self.state().object_pushes.values().sum()
    }

    pub fn confirmations(&self) -> Vec<ObjectId> {
        self.state().confirmations.clone()
    }

    pub fn has_object(&self, object_id: &ObjectId) -> bool {
        self.state().objects.contains_key(object_id)
    }

    /// Messages pushed by nodes to the coordinator whose objects are all
    /// stored, reassembled.
    pub fn received_messages(&self) -> Vec<Message> {
        let state = self.state();
        state
            .inbox
            .iter()
            .filter_map(|pending| inflate_message(&pending.tree.object_id, &state.objects).ok())
            .collect()
    }

    /// Messages still queued for `node`.
    pub fn queued(&self, node: NodeId) -> usize {
        self.state().queues.get(&node).map(VecDeque::len).unwrap_or(0)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Handlers
    // ─────────────────────────────────────────────────────────────────────────

    fn create_node(&self, request: CreateNodeRequest) -> CreateNodeResponse {
        let mut state = self.state();
        let node = NodeId(state.next_node_id);
        state.next_node_id += 1;
        state.nodes.insert(node, 0);
        tracing::debug!(node_id = %node, interval = request.heartbeat_interval, "node created");
        CreateNodeResponse { node }
    }

    fn delete_node(&self, request: DeleteNodeRequest) -> DeleteNodeResponse {
        let mut state = self.state();
        state.nodes.remove(&request.node);
        state.queues.remove(&request.node);
        DeleteNodeResponse {}
    }

    fn heartbeat(&self, request: SendNodeHeartbeatRequest) -> SendNodeHeartbeatResponse {
        let mut state = self.state();
        if state.rejected_nodes.contains(&request.node) {
            return SendNodeHeartbeatResponse { success: false };
        }
        match state.nodes.get_mut(&request.node) {
            Some(beats) => {
                *beats += 1;
                SendNodeHeartbeatResponse { success: true }
            }
            None => SendNodeHeartbeatResponse { success: false },
        }
    }

    fn pull_messages(&self, request: PullMessagesRequest) -> PullMessagesResponse {
        let mut state = self.state();
        let next = state
            .queues
            .get_mut(&request.node)
            .and_then(VecDeque::pop_front);
        match next {
            Some(pending) => PullMessagesResponse {
                messages: vec![pending.envelope],
                message_object_trees: vec![pending.tree],
            },
            None => PullMessagesResponse::default(),
        }
    }

    fn push_messages(&self, request: PushMessagesRequest) -> PushMessagesResponse {
        let mut state = self.state();
        let mut response = PushMessagesResponse::default();

        for (envelope, tree) in request.messages.into_iter().zip(request.message_object_trees) {
            let message_id = tree.object_id;
            if state.decline_code != 0 {
                response.results.push(PushResult {
                    message_id,
                    code: state.decline_code,
                });
                continue;
            }
            let missing: Vec<ObjectId> = tree
                .unique_object_ids()
                .into_iter()
                .filter(|id| !state.objects.contains_key(id))
                .collect();
            state.announced.extend(missing.iter().copied());

            response.results.push(PushResult {
                message_id,
                code: 0,
            });
            response.objects_to_push.push(MissingObjects {
                message_id,
                object_ids: missing,
            });

            let dst = envelope.metadata.dst_node_id;
            let pending = Pending { envelope, tree };
            if dst != NodeId::COORDINATOR && state.nodes.contains_key(&dst) {
                state.queues.entry(dst).or_default().push_back(pending);
            } else {
                state.inbox.push(pending);
            }
        }
        response
    }

    fn pull_object(&self, request: PullObjectRequest) -> PullObjectResponse {
        let mut state = self.state();
        *state.object_pulls.entry(request.object_id).or_default() += 1;

        match state.objects.get(&request.object_id) {
            Some(content) => PullObjectResponse {
                object_found: true,
                object_available: true,
                object_content: content.clone(),
            },
            None => PullObjectResponse {
                object_found: state.announced.contains(&request.object_id),
                object_available: false,
                object_content: Bytes::new(),
            },
        }
    }

    fn push_object(&self, request: PushObjectRequest) -> PushObjectResponse {
        let mut state = self.state();
        *state.object_pushes.entry(request.object_id).or_default() += 1;

        if state.failing_stores.contains(&request.object_id)
            || !request.object_id.matches(&request.object_content)
        {
            return PushObjectResponse { stored: false };
        }
        state.announced.remove(&request.object_id);
        state.objects.insert(request.object_id, request.object_content);
        PushObjectResponse { stored: true }
    }

    fn confirm(&self, request: ConfirmMessageReceivedRequest) -> ConfirmMessageReceivedResponse {
        self.state().confirmations.push(request.message_object_id);
        ConfirmMessageReceivedResponse {}
    }

    fn get_run(&self, request: GetRunRequest) -> Option<GetRunResponse> {
        let run = self.state().runs.get(&request.run_id).cloned()?;
        Some(GetRunResponse { run })
    }

    fn get_bundle(&self, request: GetBundleRequest) -> Option<GetBundleResponse> {
        let bundle = self.state().bundles.get(&request.hash).cloned()?;
        Some(GetBundleResponse { bundle })
    }

    fn dispatch(&self, path: &str, body: &[u8]) -> fleetlink_sync::Result<Option<Bytes>> {
        let encoded = match path {
            paths::CREATE_NODE => encode(&self.create_node(decode(body)?))?,
            paths::DELETE_NODE => encode(&self.delete_node(decode(body)?))?,
            paths::SEND_NODE_HEARTBEAT => encode(&self.heartbeat(decode(body)?))?,
            paths::PULL_MESSAGES => encode(&self.pull_messages(decode(body)?))?,
            paths::PUSH_MESSAGES => encode(&self.push_messages(decode(body)?))?,
            paths::PULL_OBJECT => encode(&self.pull_object(decode(body)?))?,
            paths::PUSH_OBJECT => encode(&self.push_object(decode(body)?))?,
            paths::CONFIRM_MESSAGE_RECEIVED => encode(&self.confirm(decode(body)?))?,
            paths::GET_RUN => match self.get_run(decode(body)?) {
                Some(response) => encode(&response)?,
                None => return Ok(None),
            },
            paths::GET_BUNDLE => match self.get_bundle(decode(body)?) {
                Some(response) => encode(&response)?,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        Ok(Some(encoded))
    }
}

#[async_trait]
impl Transport for MemoryCoordinator {
    async fn post(&self, path: &str, body: Bytes) -> fleetlink_sync::Result<TransportResponse> {
        let content_type = {
            let mut state = self.state();
            *state.requests.entry(path.to_string()).or_default() += 1;
            if state.unreachable {
                return Err(SyncError::TransportError("coordinator unreachable".into()));
            }
            if state.failing_paths.contains(path) {
                return Ok(TransportResponse::status(500));
            }
            state.content_type.clone()
        };

        let mut response = match self.dispatch(path, &body) {
            Ok(Some(encoded)) => TransportResponse::ok(encoded),
            Ok(None) => TransportResponse::status(404),
            Err(e) => {
                tracing::warn!(path, error = %e, "bad request");
                TransportResponse::status(400)
            }
        };
        if let Some(content_type) = content_type {
            response.content_type = content_type;
        }
        Ok(response)
    }
}
