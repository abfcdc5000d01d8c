//! # fleetlink sync
//!
//! Wire protocol and object transfer between a node and the fleet
//! coordinator.
//!
//! ## Overview
//!
//! Messages are too large to post in one request, so they travel as a tree
//! of content-addressed objects. The coordinator announces a message as an
//! [`ObjectTree`](fleetlink_core::ObjectTree); the node pulls the objects it
//! names. In the other direction the node announces its tree, the coordinator
//! answers with the ids it lacks, and only those are pushed.
//!
//! ## Key Properties
//!
//! - **Deduplicated**: an id referenced twice is transferred once
//! - **Verified**: pulled bytes are checked against their id
//! - **All-or-nothing pulls**: one bad object fails the pull
//! - **Best-effort pushes**: failed uploads are reported, not retried
//!
//! ## Message Flow
//!
//! ```text
//! Node                                Coordinator
//!   |-------- pull-messages ---------->|
//!   |<------- envelope + tree ---------|
//!   |-------- pull-object (xN) ------->|
//!   |-------- confirm-message -------->|
//!   |                                  |
//!   |-------- push-messages ---------->|
//!   |<------- objects to push ---------|
//!   |-------- push-object (xM) ------->|
//! ```

pub mod error;
pub mod messages;
pub mod protocol;
pub mod transport;

pub use error::{Result, SyncError};
pub use messages::{decode, encode, paths, FleetRequest};
pub use protocol::{
    ObjectContext, ObjectFetcher, ObjectStorer, ObjectSync, PushReport, SyncConfig,
};
pub use transport::{call, is_cbor, Transport, TransportResponse, CONTENT_TYPE};
