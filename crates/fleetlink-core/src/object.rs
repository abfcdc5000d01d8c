//! Object trees: how a message decomposes into content-addressed objects.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::ObjectId;

/// Discriminator written at the head of every deflated object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObjectType {
    Message = 1,
    RecordDict = 2,
    ArrayRecord = 3,
    ConfigRecord = 4,
    Array = 5,
    ArrayChunk = 6,
}

impl ObjectType {
    /// Convert to the wire tag.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Try to parse from the wire tag.
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Message),
            2 => Some(Self::RecordDict),
            3 => Some(Self::ArrayRecord),
            4 => Some(Self::ConfigRecord),
            5 => Some(Self::Array),
            6 => Some(Self::ArrayChunk),
            _ => None,
        }
    }
}

/// Recursive description of an object and the objects it references.
///
/// Children are ordered as the parent references them. The same id may
/// appear in several branches (identical chunks), making this a DAG
/// flattened into a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTree {
    pub object_id: ObjectId,
    pub children: Vec<ObjectTree>,
}

impl ObjectTree {
    /// A tree with no children.
    pub fn leaf(object_id: ObjectId) -> Self {
        Self {
            object_id,
            children: Vec::new(),
        }
    }

    /// Pre-order iteration over every node, duplicates included.
    pub fn iter(&self) -> ObjectTreeIter<'_> {
        ObjectTreeIter { stack: vec![self] }
    }

    /// Every id in pre-order, duplicates included.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.iter().map(|node| node.object_id).collect()
    }

    /// Every distinct id, in order of first appearance.
    pub fn unique_object_ids(&self) -> Vec<ObjectId> {
        let mut seen = HashSet::new();
        self.iter()
            .map(|node| node.object_id)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Total number of nodes, duplicates included.
    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Iterator returned by [`ObjectTree::iter`].
pub struct ObjectTreeIter<'a> {
    stack: Vec<&'a ObjectTree>,
}

impl<'a> Iterator for ObjectTreeIter<'a> {
    type Item = &'a ObjectTree;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        // Reverse so the first child is visited first
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}
