//! Identifiers shared by every fleetlink crate.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::Blake3Hash;

/// A 32-byte object identifier, computed as Blake3(deflated_bytes(object)).
///
/// This is the content-address of an object. Two objects with the same
/// deflated bytes have the same ObjectId, whichever node produced them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub [u8; 32]);

impl ObjectId {
    /// Compute the id of a deflated object.
    pub fn compute(deflated: &[u8]) -> Self {
        Self(Blake3Hash::hash(deflated).0)
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Check that `deflated` hashes to this id.
    pub fn matches(&self, deflated: &[u8]) -> bool {
        Self::compute(deflated) == *self
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a full 64-character hex id.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Coordinator-assigned node identity.
///
/// Only meaningful between a successful registration and teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// The coordinator itself, as a message source or destination.
    pub const COORDINATOR: Self = Self(0);

    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numbered run context a message belongs to.
pub type RunId = u64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_hex_roundtrip() {
        let id = ObjectId::from_bytes([0x42; 32]);
        let hex = id.to_hex();
        let recovered = ObjectId::from_hex(&hex).unwrap();
        assert_eq!(id, recovered);
    }

    #[test]
    fn test_object_id_display() {
        let id = ObjectId::from_bytes([0xab; 32]);
        assert_eq!(format!("{}", id), "abababababababab");
    }

    #[test]
    fn test_object_id_compute_matches() {
        let id = ObjectId::compute(b"chunk");
        assert!(id.matches(b"chunk"));
        assert!(!id.matches(b"chunk!"));
    }

    #[test]
    fn test_object_id_from_hex_wrong_length() {
        assert!(ObjectId::from_hex("abcd").is_err());
    }

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId(7).to_string(), "7");
        assert_eq!(NodeId::COORDINATOR.get(), 0);
    }
}
