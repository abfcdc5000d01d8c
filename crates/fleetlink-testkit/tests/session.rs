//! Node lifecycle against the in-memory coordinator.

use std::sync::Arc;
use std::time::Duration;

use fleetlink::{ClientError, FleetClient, RetryConfig};
use fleetlink_sync::paths;
use fleetlink_testkit::fixtures::test_config;
use fleetlink_testkit::{NodeId, TestFleet};

#[tokio::test(start_paused = true)]
async fn test_keepalive_runs_between_create_and_delete() {
    let fleet = TestFleet::new();
    let client = fleet.client_with(test_config().with_heartbeat_interval(Duration::from_secs(10)));
    assert!(!client.heartbeat_running().await);

    fleet.coordinator.set_next_node_id(7);
    assert_eq!(client.create_node().await, Some(NodeId(7)));
    assert!(client.heartbeat_running().await);

    tokio::time::sleep(Duration::from_secs(45)).await;
    // t = 0, 10, 20, 30, 40
    assert_eq!(fleet.coordinator.heartbeats(NodeId(7)), 5);

    client.delete_node().await;
    assert_eq!(client.node_id(), None);
    assert!(!client.heartbeat_running().await);
    assert!(!fleet.coordinator.is_registered(NodeId(7)));

    let sent = fleet.coordinator.requests(paths::SEND_NODE_HEARTBEAT);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(fleet.coordinator.requests(paths::SEND_NODE_HEARTBEAT), sent);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_survives_outage() {
    let fleet = TestFleet::new();
    let client = fleet.client_with(test_config().with_heartbeat_interval(Duration::from_secs(10)));
    fleet.coordinator.set_next_node_id(3);
    client.create_node().await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    fleet.coordinator.set_unreachable(true);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(client.heartbeat_running().await);

    fleet.coordinator.set_unreachable(false);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(fleet.coordinator.heartbeats(NodeId(3)) >= 2);
    assert!(!*client.rejection().borrow());

    client.delete_node().await;
}

#[tokio::test]
async fn test_registration_failure_leaves_no_session() {
    let fleet = TestFleet::new();
    fleet.coordinator.fail_path(paths::CREATE_NODE);
    let client = fleet.client();

    assert_eq!(client.create_node().await, None);
    assert_eq!(client.node_id(), None);
    assert!(!client.heartbeat_running().await);
    // Status errors are not retried
    assert_eq!(fleet.coordinator.requests(paths::CREATE_NODE), 1);
}

#[tokio::test]
async fn test_registration_retries_transport_errors() {
    let fleet = TestFleet::new();
    fleet.coordinator.set_unreachable(true);
    let client = fleet.client();

    assert_eq!(client.create_node().await, None);
    assert_eq!(fleet.coordinator.requests(paths::CREATE_NODE), 3);
}

#[tokio::test]
async fn test_operations_without_session() {
    let fleet = TestFleet::new();
    let client = fleet.client();

    client.delete_node().await;
    assert!(client.receive().await.is_none());
    assert_eq!(fleet.coordinator.requests(paths::DELETE_NODE), 0);
    assert_eq!(fleet.coordinator.requests(paths::PULL_MESSAGES), 0);
}

#[tokio::test]
async fn test_scope_tears_down_on_success() {
    let fleet = TestFleet::new();
    fleet.coordinator.set_next_node_id(11);
    let client = fleet.client();

    let result = client
        .run(|client: Arc<FleetClient>| async move {
            let node = client.create_node().await.ok_or_else(|| anyhow::anyhow!("no node"))?;
            Ok(node)
        })
        .await
        .unwrap();

    assert_eq!(result, Some(NodeId(11)));
    assert!(!fleet.coordinator.is_registered(NodeId(11)));
    assert_eq!(fleet.coordinator.requests(paths::DELETE_NODE), 1);
}

#[tokio::test]
async fn test_scope_tears_down_on_failure() {
    let fleet = TestFleet::new();
    fleet.coordinator.set_next_node_id(12);
    let client = fleet.client();

    let result: Option<()> = client
        .run(|client: Arc<FleetClient>| async move {
            client.create_node().await;
            Err::<(), _>(anyhow::anyhow!("workload crashed"))
        })
        .await
        .unwrap();

    assert_eq!(result, None);
    assert!(!fleet.coordinator.is_registered(NodeId(12)));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_heartbeat_aborts_scope() {
    let fleet = TestFleet::new();
    fleet.coordinator.set_next_node_id(5);
    fleet.coordinator.reject_heartbeats(NodeId(5));
    let client = fleet.client();

    let result = client
        .run(|client: Arc<FleetClient>| async move {
            client.create_node().await;
            // Never finishes on its own
            std::future::pending::<anyhow::Result<()>>().await
        })
        .await;

    assert!(matches!(result, Err(ClientError::HeartbeatRejected)));
    // Teardown still unregisters, with a single attempt
    assert_eq!(fleet.coordinator.requests(paths::DELETE_NODE), 1);
    assert!(!fleet.coordinator.is_registered(NodeId(5)));
}

#[tokio::test(start_paused = true)]
async fn test_new_session_after_rejection_runs_normally() {
    let fleet = TestFleet::new();
    let client = fleet.client_with(test_config().with_heartbeat_interval(Duration::from_secs(10)));
    fleet.coordinator.set_next_node_id(5);
    fleet.coordinator.reject_heartbeats(NodeId(5));

    let mut rejection = client.rejection();
    client.create_node().await;
    rejection.wait_for(|rejected| *rejected).await.unwrap();
    client.delete_node().await;

    fleet.coordinator.set_next_node_id(6);
    assert_eq!(client.create_node().await, Some(NodeId(6)));
    assert!(!*client.rejection().borrow());

    let result = client
        .run(|client: Arc<FleetClient>| async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            Ok(client.node_id())
        })
        .await
        .unwrap();

    assert_eq!(result, Some(Some(NodeId(6))));
    assert!(fleet.coordinator.heartbeats(NodeId(6)) >= 3);
    assert!(!fleet.coordinator.is_registered(NodeId(6)));
}

#[tokio::test(start_paused = true)]
async fn test_scope_success_with_unreachable_coordinator_exits() {
    let fleet = TestFleet::new();
    let unbounded = RetryConfig::default()
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
        .with_jitter(false);
    let client = fleet.client_with(test_config().with_retry(unbounded));
    fleet.coordinator.set_next_node_id(13);

    let coordinator = fleet.coordinator.clone();
    let result = client
        .run(|client: Arc<FleetClient>| async move {
            client.create_node().await;
            coordinator.set_unreachable(true);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(result, Some(()));
    assert_eq!(fleet.coordinator.requests(paths::DELETE_NODE), 1);
}

#[tokio::test]
async fn test_delete_while_unreachable_clears_session() {
    let fleet = TestFleet::new();
    let client = fleet.registered_client(8).await;
    fleet.coordinator.set_unreachable(true);

    client.delete_node().await;
    assert_eq!(client.node_id(), None);
    assert!(!client.heartbeat_running().await);
    // The coordinator never heard of the teardown
    assert!(fleet.coordinator.is_registered(NodeId(8)));
}
