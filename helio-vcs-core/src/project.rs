//! Working-state providers.
//!
//! The version control core never looks inside project data; it only asks the
//! provider for the current state of every tracked entity and hands back
//! deltas to apply when changes are reset or revisions are checked out.

use crate::item::{ChangeKind, RevisionItem};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source of the live project state the stage is computed against
pub trait TrackedItemsSource {
    /// Current state of every tracked entity, in display order
    fn current_state(&self) -> Vec<RevisionItem>;

    /// Apply deltas to the live state: `Added`/`Changed` upsert the entity,
    /// `Removed` deletes it
    fn apply_deltas(&mut self, deltas: &[RevisionItem]);
}

/// A project kept entirely in memory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InMemoryProject {
    items: Vec<RevisionItem>,
}

impl InMemoryProject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[RevisionItem] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&RevisionItem> {
        self.items.iter().find(|i| i.id == id)
    }

    /// Insert or replace an entity, keeping its position if it already exists
    pub fn upsert(&mut self, item: RevisionItem) {
        let item = item.with_kind(ChangeKind::Added);
        match self.items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
    }

    /// Replace the payload of an existing entity
    pub fn set_payload(&mut self, id: &str, payload: Value) -> bool {
        match self.items.iter_mut().find(|i| i.id == id) {
            Some(existing) => {
                existing.payload = payload;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<RevisionItem> {
        let index = self.items.iter().position(|i| i.id == id)?;
        Some(self.items.remove(index))
    }
}

impl TrackedItemsSource for InMemoryProject {
    fn current_state(&self) -> Vec<RevisionItem> {
        self.items.clone()
    }

    fn apply_deltas(&mut self, deltas: &[RevisionItem]) {
        for delta in deltas {
            match delta.kind {
                ChangeKind::Added | ChangeKind::Changed => self.upsert(delta.clone()),
                ChangeKind::Removed => {
                    self.remove(&delta.id);
                }
            }
        }
    }
}
