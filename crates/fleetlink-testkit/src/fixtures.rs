//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use fleetlink::{ClientConfig, FleetClient, RetryConfig};
use fleetlink_core::{
    message_type, Array, ArrayRecord, ConfigRecord, Message, Metadata, NodeId, RecordDict, RunId,
};

use crate::coordinator::MemoryCoordinator;

/// Install a test-friendly tracing subscriber. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Client settings for tests: fast retries bounded to three attempts.
pub fn test_config() -> ClientConfig {
    ClientConfig::new("http://coordinator.test").with_retry(
        RetryConfig::default()
            .with_max_tries(Some(3))
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_jitter(false),
    )
}

/// A coordinator and helpers to attach clients to it.
pub struct TestFleet {
    pub coordinator: Arc<MemoryCoordinator>,
}

impl TestFleet {
    pub fn new() -> Self {
        init_tracing();
        Self {
            coordinator: MemoryCoordinator::new(),
        }
    }

    /// A client with [`test_config`], not yet registered.
    pub fn client(&self) -> FleetClient {
        self.client_with(test_config())
    }

    pub fn client_with(&self, config: ClientConfig) -> FleetClient {
        FleetClient::with_transport(config, self.coordinator.clone())
    }

    /// A registered client, expected to get `node`.
    pub async fn registered_client(&self, node: u64) -> FleetClient {
        self.coordinator.set_next_node_id(node);
        let client = self.client();
        let assigned = client.create_node().await;
        assert_eq!(assigned, Some(NodeId(node)), "registration failed");
        client
    }
}

impl Default for TestFleet {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic bytes of length `len`, distinct per `seed`.
pub fn array_bytes(len: usize, seed: u8) -> Bytes {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect::<Vec<u8>>()
        .into()
}

/// Content with one array split into exactly `chunks` distinct chunks.
pub fn chunked_payload(chunks: usize, chunk_size: usize) -> RecordDict {
    // Each chunk gets its own seed so no two chunks share an id
    let data: Vec<u8> = (0..chunks)
        .flat_map(|i| array_bytes(chunk_size, i as u8 + 1).to_vec())
        .collect();
    let array = Array::with_chunk_size("u8", vec![data.len() as u64], "numpy.ndarray", data, chunk_size);
    RecordDict::new()
        .with_arrays("parameters", ArrayRecord::new().with("weights", array))
        .with_config("config", ConfigRecord::new().with("epochs", 1i64))
}

/// Content whose two arrays share all of their chunks.
pub fn shared_chunk_payload(chunks: usize, chunk_size: usize) -> RecordDict {
    let data: Vec<u8> = (0..chunks)
        .flat_map(|i| array_bytes(chunk_size, i as u8 + 1).to_vec())
        .collect();
    let len = data.len() as u64;
    let data = Bytes::from(data);
    let params = ArrayRecord::new()
        .with("a", Array::with_chunk_size("u8", vec![len], "numpy.ndarray", data.clone(), chunk_size))
        .with("b", Array::with_chunk_size("u8", vec![len], "numpy.ndarray", data, chunk_size));
    RecordDict::new().with_arrays("parameters", params)
}

/// A training instruction from the coordinator to `dst`.
pub fn instruction(run_id: RunId, dst: NodeId, content: RecordDict) -> Message {
    Message::new(
        Metadata::new(run_id, NodeId::COORDINATOR, dst, message_type::TRAIN),
        content,
    )
}

/// The id-free view of a message, for comparing a sent message with its
/// received copy.
pub fn without_id(message: &Message) -> Message {
    let mut message = message.clone();
    message.metadata.message_id = None;
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlink_core::FrozenObjects;

    #[test]
    fn test_chunked_payload_has_distinct_chunks() {
        let content = chunked_payload(3, 16);
        let array = content
            .array_record("parameters")
            .and_then(|r| r.get("weights"))
            .unwrap();
        assert_eq!(array.num_chunks(), 3);

        let message = instruction(1, NodeId(7), content);
        let frozen = FrozenObjects::freeze(&message);
        // message, record dict, array record, array, config record, 3 chunks
        assert_eq!(frozen.tree().unique_object_ids().len(), 8);
    }

    #[test]
    fn test_shared_chunks_dedup() {
        let message = instruction(1, NodeId(7), shared_chunk_payload(2, 8));
        let frozen = FrozenObjects::freeze(&message);
        let tree = frozen.tree();
        assert!(tree.object_ids().len() > tree.unique_object_ids().len());
    }

    #[test]
    fn test_array_bytes_deterministic() {
        assert_eq!(array_bytes(32, 4), array_bytes(32, 4));
        assert_ne!(array_bytes(32, 4), array_bytes(32, 5));
    }
}
