//! Revision items: the atomic, named units of change.
//!
//! An item carries the full serialized state of one tracked project entity
//! (a track, the project info, the timeline) together with the kind of
//! change it represents relative to its parent revision.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category tags of tracked project entities
pub mod category {
    pub const PROJECT_INFO: &str = "projectInfo";
    pub const PROJECT_TIMELINE: &str = "projectTimeline";
    pub const PIANO_TRACK: &str = "pianoTrack";
    pub const AUTOMATION_TRACK: &str = "automationTrack";
}

/// Kind of change an item records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    #[default]
    Added,
    Removed,
    Changed,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::Changed => "changed",
        }
    }
}

/// One delta of a revision, unique by `id` within that revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionItem {
    /// Id of the tracked entity this item describes (the semantic key)
    pub id: String,
    #[serde(default)]
    pub kind: ChangeKind,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub payload: Value,
}

impl RevisionItem {
    /// Create an item describing the current state of an entity
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        name: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: id.into(),
            kind: ChangeKind::Added,
            category: category.into(),
            name: name.into(),
            payload,
        }
    }

    /// Copy of this item re-tagged with another change kind
    pub fn with_kind(&self, kind: ChangeKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    /// Whether two items describe the same entity state, ignoring the change kind
    pub fn same_state_as(&self, other: &RevisionItem) -> bool {
        self.id == other.id
            && self.category == other.category
            && self.name == other.name
            && self.payload == other.payload
    }

    /// Short human-readable line, e.g. `changed: Lead piano`
    pub fn describe(&self) -> String {
        let name = if self.name.is_empty() { &self.id } else { &self.name };
        format!("{}: {}", self.kind.as_str(), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_defaults_on_old_documents() {
        let item: RevisionItem = serde_json::from_value(json!({ "id": "t1" })).unwrap();
        assert_eq!(item.kind, ChangeKind::Added);
        assert!(item.category.is_empty());
        assert_eq!(item.payload, Value::Null);
    }

    #[test]
    fn test_same_state_ignores_kind() {
        let a = RevisionItem::new("t1", category::PIANO_TRACK, "Piano", json!({"notes": [60]}));
        let b = a.with_kind(ChangeKind::Changed);
        assert!(a.same_state_as(&b));

        let c = RevisionItem::new("t1", category::PIANO_TRACK, "Piano", json!({"notes": [61]}));
        assert!(!a.same_state_as(&c));
    }

    #[test]
    fn test_describe() {
        let item = RevisionItem::new("t1", category::PIANO_TRACK, "Lead", json!(null))
            .with_kind(ChangeKind::Removed);
        assert_eq!(item.describe(), "removed: Lead");
    }
}
