//! Deflation and inflation of content-addressed objects.
//!
//! Deflating an object produces canonical bytes of the form
//! `[type_tag, body]`, where the body refers to child objects only by id.
//! The object's id is the Blake3 hash of those bytes.
//!
//! [`FrozenObjects`] deflates a whole object graph exactly once. Both the
//! announced [`ObjectTree`] and the bytes later uploaded come from that single
//! pass, so the two can never disagree about an id.

use std::collections::HashMap;

use bytes::Bytes;
use ciborium::value::Value;

use crate::canonical::{decode_value, encode_canonical};
use crate::error::{CoreError, Result};
use crate::message::Message;
use crate::object::{ObjectTree, ObjectType};
use crate::types::ObjectId;

/// An object that can be decomposed into content-addressed parts.
pub trait Inflatable {
    /// The type tag written into the deflated bytes.
    fn object_type(&self) -> ObjectType;

    /// Direct children, in the order their ids appear in the body.
    fn children(&self) -> Vec<&dyn Inflatable>;

    /// The body, given the already computed ids of [`Inflatable::children`].
    fn deflate_body(&self, child_ids: &[ObjectId]) -> Value;
}

/// Deflate a single object given its children's ids.
pub fn deflate(object: &dyn Inflatable, child_ids: &[ObjectId]) -> Vec<u8> {
    let framed = Value::Array(vec![
        Value::Integer(object.object_type().to_u8().into()),
        object.deflate_body(child_ids),
    ]);
    encode_canonical(&framed)
}

/// Every object of a graph, deflated once, with ids fixed for its lifetime.
#[derive(Debug, Clone)]
pub struct FrozenObjects {
    tree: ObjectTree,
    objects: HashMap<ObjectId, Bytes>,
}

impl FrozenObjects {
    /// Deflate `root` and all of its descendants.
    pub fn freeze(root: &dyn Inflatable) -> Self {
        let mut objects = HashMap::new();
        let tree = freeze_node(root, &mut objects);
        Self { tree, objects }
    }

    /// The root object's id.
    pub fn root_id(&self) -> ObjectId {
        self.tree.object_id
    }

    /// The hierarchy of ids rooted at the frozen object.
    pub fn tree(&self) -> &ObjectTree {
        &self.tree
    }

    /// All nested objects keyed by id, the root included.
    pub fn objects(&self) -> &HashMap<ObjectId, Bytes> {
        &self.objects
    }

    /// Deflated bytes of one object.
    pub fn get(&self, id: &ObjectId) -> Option<&Bytes> {
        self.objects.get(id)
    }

    pub fn into_parts(self) -> (ObjectTree, HashMap<ObjectId, Bytes>) {
        (self.tree, self.objects)
    }
}

fn freeze_node(object: &dyn Inflatable, objects: &mut HashMap<ObjectId, Bytes>) -> ObjectTree {
    let children: Vec<ObjectTree> = object
        .children()
        .into_iter()
        .map(|child| freeze_node(child, objects))
        .collect();
    let child_ids: Vec<ObjectId> = children.iter().map(|c| c.object_id).collect();

    let bytes = deflate(object, &child_ids);
    let object_id = ObjectId::compute(&bytes);
    objects.entry(object_id).or_insert_with(|| Bytes::from(bytes));

    ObjectTree {
        object_id,
        children,
    }
}

/// Read access to pulled object contents during inflation.
///
/// Every load re-checks the content hash, so a corrupted object surfaces as
/// an error rather than as a silently different message.
pub struct ObjectContents<'a> {
    contents: &'a HashMap<ObjectId, Bytes>,
}

impl<'a> ObjectContents<'a> {
    pub fn new(contents: &'a HashMap<ObjectId, Bytes>) -> Self {
        Self { contents }
    }

    fn raw(&self, id: &ObjectId) -> Result<(ObjectType, Value)> {
        let bytes = self.contents.get(id).ok_or(CoreError::MissingObject(*id))?;

        let actual = ObjectId::compute(bytes);
        if actual != *id {
            return Err(CoreError::ObjectIdMismatch {
                expected: *id,
                actual,
            });
        }

        let mut framed = match decode_value(bytes)? {
            Value::Array(items) if items.len() == 2 => items,
            _ => return Err(CoreError::malformed(*id, "expected [type, body]")),
        };
        let body = framed.pop().unwrap_or(Value::Null);
        let tag = match &framed[0] {
            Value::Integer(i) => u64::try_from(i128::from(*i))
                .map_err(|_| CoreError::malformed(*id, "invalid type tag"))?,
            _ => return Err(CoreError::malformed(*id, "invalid type tag")),
        };
        let object_type = ObjectType::from_u64(tag).ok_or(CoreError::UnknownObjectType(tag))?;
        Ok((object_type, body))
    }

    /// The type tag of an object.
    pub fn object_type(&self, id: &ObjectId) -> Result<ObjectType> {
        self.raw(id).map(|(ty, _)| ty)
    }

    /// Load an object's body, checking its type.
    pub fn load(&self, id: &ObjectId, expected: ObjectType) -> Result<Value> {
        let (actual, body) = self.raw(id)?;
        if actual != expected {
            return Err(CoreError::UnexpectedObjectType {
                id: *id,
                expected,
                actual,
            });
        }
        Ok(body)
    }
}

/// Reconstruct a message from its pulled objects.
///
/// The deflated message does not carry its own id; it is injected here from
/// `message_id`.
pub fn inflate_message(message_id: &ObjectId, contents: &HashMap<ObjectId, Bytes>) -> Result<Message> {
    let mut message = Message::inflate(message_id, &ObjectContents::new(contents))?;
    message.metadata.message_id = Some(*message_id);
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Metadata;
    use crate::record::{Array, ArrayRecord, ConfigRecord, RecordDict};
    use crate::types::NodeId;

    fn sample_message() -> Message {
        let shared = vec![9u8; 8];
        let params = ArrayRecord::new()
            .with("w", Array::with_chunk_size("u8", vec![16], "raw", [shared.clone(), vec![1u8; 8]].concat(), 8))
            .with("b", Array::with_chunk_size("u8", vec![8], "raw", shared, 8));
        let content = RecordDict::new()
            .with_arrays("params", params)
            .with_config("config", ConfigRecord::new().with("epochs", 3i64));
        Message::new(Metadata::new(5, NodeId(0), NodeId(7), "train"), content)
    }

    #[test]
    fn test_freeze_is_deterministic() {
        let message = sample_message();
        let a = FrozenObjects::freeze(&message);
        let b = FrozenObjects::freeze(&message);
        assert_eq!(a.tree(), b.tree());
        assert_eq!(a.root_id(), message.object_id());
    }

    #[test]
    fn test_frozen_ids_match_bytes() {
        let frozen = FrozenObjects::freeze(&sample_message());
        for node in frozen.tree().iter() {
            let bytes = frozen.get(&node.object_id).expect("object present");
            assert!(node.object_id.matches(bytes));
        }
    }

    #[test]
    fn test_identical_chunks_share_an_id() {
        let frozen = FrozenObjects::freeze(&sample_message());
        let tree = frozen.tree();
        // Two arrays share the [9; 8] chunk
        assert!(tree.node_count() > tree.unique_object_ids().len());
        assert_eq!(frozen.objects().len(), tree.unique_object_ids().len());
    }

    #[test]
    fn test_inflate_roundtrip() {
        let message = sample_message();
        let frozen = FrozenObjects::freeze(&message);
        let inflated = inflate_message(&frozen.root_id(), frozen.objects()).unwrap();

        assert_eq!(inflated.metadata.message_id, Some(frozen.root_id()));
        assert_eq!(inflated.content, message.content);
        assert_eq!(inflated.metadata.dst_node_id, NodeId(7));
    }

    #[test]
    fn test_inflate_missing_object() {
        let frozen = FrozenObjects::freeze(&sample_message());
        let (tree, mut objects) = frozen.into_parts();
        let leaf = *tree.object_ids().last().unwrap();
        objects.remove(&leaf);

        let err = inflate_message(&tree.object_id, &objects).unwrap_err();
        assert!(matches!(err, CoreError::MissingObject(id) if id == leaf));
    }

    #[test]
    fn test_inflate_detects_corruption() {
        let frozen = FrozenObjects::freeze(&sample_message());
        let (tree, mut objects) = frozen.into_parts();
        let leaf = *tree.object_ids().last().unwrap();
        objects.insert(leaf, Bytes::from_static(b"garbage"));

        let err = inflate_message(&tree.object_id, &objects).unwrap_err();
        assert!(matches!(err, CoreError::ObjectIdMismatch { .. }));
    }

    #[test]
    fn test_inflate_wrong_root_type() {
        let frozen = FrozenObjects::freeze(&sample_message());
        let chunk_id = *frozen.tree().object_ids().last().unwrap();
        let err = inflate_message(&chunk_id, frozen.objects()).unwrap_err();
        assert!(matches!(err, CoreError::UnexpectedObjectType { .. }));
    }
}
