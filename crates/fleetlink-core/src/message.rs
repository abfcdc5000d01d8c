//! Messages: the unit of work exchanged between a node and the coordinator.
//!
//! A message is an envelope ([`Metadata`]) plus either content or an error.
//! The message's own id is the id of its deflated form, so it is only known
//! once the message has been frozen or received.

use std::time::{SystemTime, UNIX_EPOCH};

use ciborium::value::Value;
use serde::{Deserialize, Serialize};

use crate::canonical::{int_map, optional_id_value, Fields};
use crate::error::{CoreError, Result};
use crate::inflatable::{FrozenObjects, Inflatable, ObjectContents};
use crate::object::ObjectType;
use crate::record::RecordDict;
use crate::types::{NodeId, ObjectId, RunId};

/// Well-known message types.
pub mod message_type {
    pub const TRAIN: &str = "train";
    pub const EVALUATE: &str = "evaluate";
    pub const QUERY: &str = "query";
    pub const SYSTEM: &str = "system";
}

/// Default time-to-live of a message, in seconds.
pub const DEFAULT_TTL: u64 = 43_200;

mod keys {
    pub const RUN_ID: u64 = 0;
    pub const SRC_NODE_ID: u64 = 1;
    pub const DST_NODE_ID: u64 = 2;
    pub const REPLY_TO: u64 = 3;
    pub const GROUP_ID: u64 = 4;
    pub const CREATED_AT: u64 = 5;
    pub const TTL: u64 = 6;
    pub const MESSAGE_TYPE: u64 = 7;
    pub const CONTENT: u64 = 8;
    pub const ERROR: u64 = 9;
}

/// Message envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub run_id: RunId,
    /// Id of the deflated message. Not part of the deflated bytes.
    pub message_id: Option<ObjectId>,
    pub src_node_id: NodeId,
    pub dst_node_id: NodeId,
    pub reply_to_message_id: Option<ObjectId>,
    pub group_id: String,
    /// Creation time, Unix milliseconds.
    pub created_at: i64,
    /// Time-to-live in seconds.
    pub ttl: u64,
    pub message_type: String,
}

impl Metadata {
    pub fn new(
        run_id: RunId,
        src_node_id: NodeId,
        dst_node_id: NodeId,
        message_type: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            message_id: None,
            src_node_id,
            dst_node_id,
            reply_to_message_id: None,
            group_id: String::new(),
            created_at: now_millis(),
            ttl: DEFAULT_TTL,
            message_type: message_type.into(),
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Error carried by a message instead of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageError {
    pub code: i64,
    pub reason: String,
}

/// The content-free part of a message, as announced in push/pull requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub metadata: Metadata,
    pub error: Option<MessageError>,
}

/// A message with its content.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub metadata: Metadata,
    pub content: Option<RecordDict>,
    pub error: Option<MessageError>,
}

impl Message {
    /// Create a message carrying content.
    pub fn new(metadata: Metadata, content: RecordDict) -> Self {
        Self {
            metadata,
            content: Some(content),
            error: None,
        }
    }

    /// Create a message carrying an error.
    pub fn from_error(metadata: Metadata, error: MessageError) -> Self {
        Self {
            metadata,
            content: None,
            error: Some(error),
        }
    }

    /// Build the reply to this message with the given content.
    pub fn reply(&self, content: RecordDict) -> Self {
        Self::new(self.reply_metadata(), content)
    }

    /// Build an error reply to this message.
    pub fn error_reply(&self, error: MessageError) -> Self {
        Self::from_error(self.reply_metadata(), error)
    }

    fn reply_metadata(&self) -> Metadata {
        Metadata {
            run_id: self.metadata.run_id,
            message_id: None,
            src_node_id: self.metadata.dst_node_id,
            dst_node_id: self.metadata.src_node_id,
            reply_to_message_id: self.metadata.message_id,
            group_id: self.metadata.group_id.clone(),
            created_at: now_millis(),
            ttl: self.metadata.ttl,
            message_type: self.metadata.message_type.clone(),
        }
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    /// Compute this message's id.
    ///
    /// Deflates the whole message; use [`FrozenObjects`] when the tree and
    /// the objects are needed as well.
    pub fn object_id(&self) -> ObjectId {
        FrozenObjects::freeze(self).root_id()
    }

    /// The envelope with content stripped, carrying `message_id`.
    pub fn envelope(&self, message_id: ObjectId) -> MessageEnvelope {
        let mut metadata = self.metadata.clone();
        metadata.message_id = Some(message_id);
        MessageEnvelope {
            metadata,
            error: self.error.clone(),
        }
    }

    pub(crate) fn inflate(id: &ObjectId, contents: &ObjectContents<'_>) -> Result<Self> {
        let body = contents.load(id, ObjectType::Message)?;
        let fields = Fields::new(*id, &body)?;

        let metadata = Metadata {
            run_id: fields.u64(keys::RUN_ID, "run_id")?,
            message_id: None,
            src_node_id: NodeId(fields.u64(keys::SRC_NODE_ID, "src_node_id")?),
            dst_node_id: NodeId(fields.u64(keys::DST_NODE_ID, "dst_node_id")?),
            reply_to_message_id: fields.optional_object_id(keys::REPLY_TO, "reply_to")?,
            group_id: fields.text(keys::GROUP_ID, "group_id")?.to_string(),
            created_at: fields.i64(keys::CREATED_AT, "created_at")?,
            ttl: fields.u64(keys::TTL, "ttl")?,
            message_type: fields.text(keys::MESSAGE_TYPE, "message_type")?.to_string(),
        };

        let content = match fields.optional_object_id(keys::CONTENT, "content")? {
            Some(content_id) => Some(RecordDict::inflate(&content_id, contents)?),
            None => None,
        };

        let error = match fields.get(keys::ERROR) {
            None | Some(Value::Null) => None,
            Some(Value::Array(pair)) if pair.len() == 2 => match (&pair[0], &pair[1]) {
                (Value::Integer(code), Value::Text(reason)) => Some(MessageError {
                    code: i64::try_from(i128::from(*code))
                        .map_err(|_| CoreError::malformed(*id, "error code out of range"))?,
                    reason: reason.clone(),
                }),
                _ => return Err(CoreError::malformed(*id, "invalid error")),
            },
            Some(_) => return Err(CoreError::malformed(*id, "invalid error")),
        };

        Ok(Self {
            metadata,
            content,
            error,
        })
    }
}

impl Inflatable for Message {
    fn object_type(&self) -> ObjectType {
        ObjectType::Message
    }

    fn children(&self) -> Vec<&dyn Inflatable> {
        match &self.content {
            Some(content) => vec![content as &dyn Inflatable],
            None => Vec::new(),
        }
    }

    fn deflate_body(&self, child_ids: &[ObjectId]) -> Value {
        let md = &self.metadata;
        let error = match &self.error {
            Some(e) => Value::Array(vec![
                Value::Integer(e.code.into()),
                Value::Text(e.reason.clone()),
            ]),
            None => Value::Null,
        };
        int_map(vec![
            (keys::RUN_ID, Value::Integer(md.run_id.into())),
            (keys::SRC_NODE_ID, Value::Integer(md.src_node_id.0.into())),
            (keys::DST_NODE_ID, Value::Integer(md.dst_node_id.0.into())),
            (keys::REPLY_TO, optional_id_value(md.reply_to_message_id.as_ref())),
            (keys::GROUP_ID, Value::Text(md.group_id.clone())),
            (keys::CREATED_AT, Value::Integer(md.created_at.into())),
            (keys::TTL, Value::Integer(md.ttl.into())),
            (keys::MESSAGE_TYPE, Value::Text(md.message_type.clone())),
            (keys::CONTENT, optional_id_value(child_ids.first())),
            (keys::ERROR, error),
        ])
    }
}

/// Current time in Unix milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
