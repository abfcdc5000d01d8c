//! # Fleetlink Testkit
//!
//! Testing utilities for fleetlink.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Coordinator**: an in-memory coordinator that answers fleet requests,
//!   counts them, and injects faults
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: Helpers for setting up clients and payloads
//!
//! ## In-Memory Fleet
//!
//! ```rust,no_run
//! use fleetlink_testkit::fixtures::{chunked_payload, instruction, TestFleet};
//! use fleetlink_testkit::NodeId;
//!
//! # async fn demo() {
//! let fleet = TestFleet::new();
//! let client = fleet.registered_client(7).await;
//!
//! fleet.coordinator.enqueue(&instruction(1, NodeId(7), chunked_payload(3, 1024)));
//! let message = client.receive().await.expect("instruction pending");
//! client.delete_node().await;
//! # }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use fleetlink_testkit::generators::{message_from_params, MessageParams};
//!
//! proptest! {
//!     #[test]
//!     fn message_id_is_deterministic(params: MessageParams) {
//!         let m1 = message_from_params(&params);
//!         let m2 = message_from_params(&params);
//!         prop_assert_eq!(m1.object_id(), m2.object_id());
//!     }
//! }
//! ```

pub mod coordinator;
pub mod fixtures;
pub mod generators;

pub use coordinator::MemoryCoordinator;
pub use fixtures::{init_tracing, test_config, TestFleet};
pub use generators::{message_from_params, MessageParams};

pub use fleetlink_core::NodeId;
