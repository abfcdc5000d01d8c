//! # fleetlink
//!
//! The node side of the fleet protocol: a worker registers with a central
//! coordinator, keeps itself alive with heartbeats, and exchanges task
//! messages whose payloads travel as content-addressed chunks.
//!
//! ## Overview
//!
//! - **Session**: register, heartbeat, unregister ([`NodeSession`])
//! - **Exchange**: receive instructions, send replies ([`MessageExchange`])
//! - **Metadata**: look up runs and bundles
//! - **Scope**: run work and always tear down ([`FleetClient::run`])
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fleetlink::{ClientConfig, FleetClient};
//!
//! async fn example() -> fleetlink::Result<()> {
//!     let client = FleetClient::connect(ClientConfig::new("https://coordinator:9095"))?;
//!
//!     client
//!         .run(|client| async move {
//!             client.create_node().await;
//!             while let Some(instruction) = client.receive().await {
//!                 let reply = instruction.reply(instruction.content.clone().unwrap_or_default());
//!                 client.send(&reply).await;
//!             }
//!             Ok(())
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `fleetlink::core` - Object model (messages, records, ids)
//! - `fleetlink::sync` - Wire messages, transport trait, object sync

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod exchange;
pub mod heartbeat;
pub mod http;
pub mod retry;
pub mod session;

// Re-export component crates
pub use fleetlink_core as core;
pub use fleetlink_sync as sync;

// Re-export main types for convenience
pub use api::FleetApi;
pub use client::FleetClient;
pub use config::{ClientConfig, RootCertificates};
pub use error::{ClientError, Result};
pub use exchange::{MessageExchange, RemoteObjects};
pub use heartbeat::{HeartbeatProbe, HeartbeatSender, ProbeOutcome};
pub use http::HttpTransport;
pub use retry::{RetryConfig, RetryInvoker};
pub use session::{NodeProbe, NodeSession};

// Re-export commonly used core types
pub use fleetlink_core::{
    Array, ArrayRecord, Bundle, ConfigRecord, ConfigValue, Message, MessageError, Metadata,
    NodeId, ObjectId, RecordDict, Run, RunId,
};
pub use fleetlink_sync::{PushReport, SyncConfig, Transport};
