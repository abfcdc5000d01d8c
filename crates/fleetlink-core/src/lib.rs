//! # fleetlink core
//!
//! Pure primitives for fleetlink: content-addressed objects, messages and
//! their decomposition into chunks.
//!
//! This crate contains no I/O and no networking. It is pure computation
//! over the message object graph.
//!
//! ## Key Types
//!
//! - [`Message`] - Envelope plus content exchanged with the coordinator
//! - [`ObjectId`] - Content-addressed identifier (Blake3 hash)
//! - [`ObjectTree`] - How a message decomposes into objects
//! - [`FrozenObjects`] - One deflation of a message, ids fixed
//!
//! ## Canonicalization
//!
//! All objects are encoded using deterministic CBOR. See [`canonical`] module.

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod inflatable;
pub mod message;
pub mod object;
pub mod record;
pub mod run;
pub mod types;

pub use crypto::{Blake3Hash, Ed25519PublicKey, Keypair};
pub use error::{CoreError, Result};
pub use inflatable::{deflate, inflate_message, FrozenObjects, Inflatable, ObjectContents};
pub use message::{message_type, Message, MessageEnvelope, MessageError, Metadata};
pub use object::{ObjectTree, ObjectType};
pub use record::{
    Array, ArrayChunk, ArrayRecord, ConfigRecord, ConfigValue, Record, RecordDict,
    ARRAY_CHUNK_SIZE,
};
pub use run::{Bundle, Run};
pub use types::{NodeId, ObjectId, RunId};
