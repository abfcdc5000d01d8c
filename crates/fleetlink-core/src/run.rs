//! Run and bundle metadata fetched from the coordinator.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::crypto::Blake3Hash;
use crate::record::ConfigValue;
use crate::types::RunId;

/// A numbered work session and the bundle it executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub bundle_id: String,
    pub bundle_version: String,
    /// Hex hash of the bundle content.
    pub bundle_hash: String,
    pub override_config: BTreeMap<String, ConfigValue>,
    pub federation: String,
}

impl Run {
    /// Placeholder returned when the run could not be fetched.
    pub fn empty(run_id: RunId) -> Self {
        Self {
            run_id,
            bundle_id: String::new(),
            bundle_version: String::new(),
            bundle_hash: String::new(),
            override_config: BTreeMap::new(),
            federation: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bundle_id.is_empty() && self.bundle_hash.is_empty()
    }
}

/// A distributable artifact identified by its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    /// Hex Blake3 hash of `content`.
    pub hash: String,
    pub content: Bytes,
}

impl Bundle {
    /// Build a bundle, computing its hash.
    pub fn new(content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self {
            hash: Blake3Hash::hash(&content).to_hex(),
            content,
        }
    }

    /// Placeholder returned when the bundle could not be fetched.
    pub fn empty() -> Self {
        Self {
            hash: String::new(),
            content: Bytes::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hash.is_empty() && self.content.is_empty()
    }

    /// Check that `content` hashes to `hash`.
    pub fn verify(&self) -> bool {
        Blake3Hash::hash(&self.content).to_hex() == self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_run() {
        let run = Run::empty(12);
        assert_eq!(run.run_id, 12);
        assert!(run.is_empty());
    }

    #[test]
    fn test_bundle_verify() {
        let bundle = Bundle::new(b"bundle bytes".to_vec());
        assert!(bundle.verify());

        let tampered = Bundle {
            hash: bundle.hash.clone(),
            content: Bytes::from_static(b"other bytes"),
        };
        assert!(!tampered.verify());
    }

    #[test]
    fn test_empty_bundle() {
        assert!(Bundle::empty().is_empty());
    }

    #[test]
    fn test_run_serde_json() {
        let mut run = Run::empty(1);
        run.override_config.insert("lr".into(), ConfigValue::Float(0.01));
        let json = serde_json::to_string(&run).unwrap();
        let back: Run = serde_json::from_str(&json).unwrap();
        assert_eq!(run, back);
    }
}
