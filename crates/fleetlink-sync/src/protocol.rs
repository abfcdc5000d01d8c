//! Object sync protocol.
//!
//! Moves the content-addressed objects of a message between a node and the
//! coordinator. Pulling walks an [`ObjectTree`] and fetches every distinct id
//! once; pushing uploads exactly the ids the coordinator reported missing.
//! Both run a bounded number of requests concurrently.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinSet;

use fleetlink_core::{NodeId, ObjectId, ObjectTree, RunId};

use crate::error::{Result, SyncError};

/// The node and run an object transfer is performed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectContext {
    pub node: NodeId,
    pub run_id: RunId,
}

impl ObjectContext {
    pub fn new(node: NodeId, run_id: RunId) -> Self {
        Self { node, run_id }
    }
}

/// Retrieves one object's deflated bytes.
#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    /// `None` if the object could not be obtained.
    async fn fetch(&self, object_id: ObjectId) -> Option<Bytes>;
}

/// Uploads one object's deflated bytes.
#[async_trait]
pub trait ObjectStorer: Send + Sync {
    /// `true` if the object was accepted.
    async fn store(&self, object_id: ObjectId, content: Bytes) -> bool;
}

/// Configuration for sync behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum fetches or stores in flight at once.
    pub max_concurrent: usize,
    /// Whether to check fetched bytes against their id.
    pub verify_content: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            verify_content: true,
        }
    }
}

/// Outcome of a push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Objects the coordinator accepted.
    pub pushed: Vec<ObjectId>,
    /// Objects that could not be uploaded.
    pub failed: Vec<ObjectId>,
}

impl PushReport {
    /// Whether every requested object was uploaded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn finish(mut self) -> Self {
        self.pushed.sort();
        self.failed.sort();
        self
    }
}

/// Pull and push of object sets.
#[derive(Debug, Clone, Default)]
pub struct ObjectSync {
    config: SyncConfig,
}

impl ObjectSync {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn limit(&self) -> usize {
        self.config.max_concurrent.max(1)
    }

    /// Fetch every object reachable from `tree`.
    ///
    /// Each distinct id is fetched once. The first unavailable or mismatching
    /// object fails the whole pull and cancels the fetches still in flight.
    pub async fn pull(
        &self,
        fetcher: Arc<dyn ObjectFetcher>,
        tree: &ObjectTree,
    ) -> Result<HashMap<ObjectId, Bytes>> {
        let ids = tree.unique_object_ids();
        let mut contents = HashMap::with_capacity(ids.len());
        let mut pending = ids.into_iter();
        let mut tasks = JoinSet::new();

        loop {
            while tasks.len() < self.limit() {
                let Some(id) = pending.next() else { break };
                let fetcher = Arc::clone(&fetcher);
                tasks.spawn(async move { (id, fetcher.fetch(id).await) });
            }

            let Some(joined) = tasks.join_next().await else { break };
            let (id, fetched) = joined.map_err(|e| SyncError::TaskFailed(e.to_string()))?;
            let content = fetched.ok_or(SyncError::ObjectUnavailable(id))?;

            if self.config.verify_content {
                let actual = ObjectId::compute(&content);
                if actual != id {
                    return Err(SyncError::ContentMismatch {
                        expected: id,
                        actual,
                    });
                }
            }

            tracing::trace!(object_id = %id, len = content.len(), "object pulled");
            contents.insert(id, content);
        }

        Ok(contents)
    }

    /// Upload `missing` from `objects`.
    ///
    /// Each id is stored at most once. A failed store, or an id with no local
    /// bytes, is recorded in the report and does not stop the others.
    pub async fn push(
        &self,
        storer: Arc<dyn ObjectStorer>,
        objects: &HashMap<ObjectId, Bytes>,
        missing: &[ObjectId],
    ) -> PushReport {
        let mut report = PushReport::default();
        let mut seen = HashSet::with_capacity(missing.len());
        let mut pending = Vec::with_capacity(missing.len());

        for id in missing {
            if !seen.insert(*id) {
                continue;
            }
            match objects.get(id) {
                Some(content) => pending.push((*id, content.clone())),
                None => {
                    tracing::warn!(object_id = %id, "requested object is not part of the message");
                    report.failed.push(*id);
                }
            }
        }

        let mut pending = pending.into_iter();
        let mut in_flight = HashSet::new();
        let mut tasks = JoinSet::new();

        loop {
            while tasks.len() < self.limit() {
                let Some((id, content)) = pending.next() else { break };
                let storer = Arc::clone(&storer);
                in_flight.insert(id);
                tasks.spawn(async move { (id, storer.store(id, content).await) });
            }

            let Some(joined) = tasks.join_next().await else { break };
            match joined {
                Ok((id, true)) => {
                    in_flight.remove(&id);
                    report.pushed.push(id);
                }
                Ok((id, false)) => {
                    in_flight.remove(&id);
                    tracing::warn!(object_id = %id, "failed to push object");
                    report.failed.push(id);
                }
                Err(e) => tracing::error!(error = %e, "push task failed"),
            }
        }

        // Ids whose task died without reporting back
        report.failed.extend(in_flight);
        report.finish()
    }
}
