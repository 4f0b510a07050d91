//! Cache of which revisions are known to exist remotely.

use crate::dto::RevisionDto;
use crate::revision::Revision;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Remote existence info keyed by revision id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCache {
    /// Revision id → remote timestamp
    #[serde(default)]
    revisions: BTreeMap<String, i64>,
    /// Time of the last successful fetch, epoch milliseconds
    #[serde(default)]
    last_fetch_ms: Option<i64>,
}

impl RemoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cache wholesale with a fresh remote listing
    pub fn update_for_remote_revisions(&mut self, revisions: &[RevisionDto]) {
        self.revisions = revisions
            .iter()
            .map(|dto| (dto.id.clone(), dto.timestamp))
            .collect();
        self.last_fetch_ms = Some(chrono::Utc::now().timestamp_millis());
    }

    /// Record a local revision that has just been pushed
    pub fn update_for_local_revision(&mut self, revision: &Revision) {
        self.revisions
            .insert(revision.id().to_string(), revision.timestamp());
    }

    pub fn has_revision_tracked(&self, id: &str) -> bool {
        self.revisions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn last_fetch_ms(&self) -> Option<i64> {
        self.last_fetch_ms
    }

    pub fn reset(&mut self) {
        self.revisions.clear();
        self.last_fetch_ms = None;
    }
}
