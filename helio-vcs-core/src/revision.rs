//! Revision tree nodes.
//!
//! A revision owns its children; the link back to the parent is kept as the
//! parent's id and is never used to reach the parent's data directly. Lookups
//! by id go through the owning tree (see [`Revision::find`]).

use crate::dto::RevisionDto;
use crate::error::{Result, VcsError};
use crate::item::RevisionItem;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Where a revision stands relative to the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Known only locally
    #[default]
    NoSync,
    /// Known to exist remotely, deltas not fetched yet
    ShallowCopy,
    /// Fully populated and known remotely
    FullSync,
}

/// A node of the history tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    deltas: Vec<RevisionItem>,
    #[serde(default)]
    children: Vec<Revision>,
    #[serde(skip)]
    parent_id: Option<String>,
    #[serde(skip)]
    sync_state: SyncState,
}

impl Revision {
    /// Create a new local revision with a fresh id and the current time
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_id(
            uuid::Uuid::new_v4().to_string(),
            message,
            chrono::Utc::now().timestamp_millis(),
        )
    }

    /// Create a local revision with explicit metadata
    pub fn with_id(id: impl Into<String>, message: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            timestamp,
            deltas: Vec::new(),
            children: Vec::new(),
            parent_id: None,
            sync_state: SyncState::NoSync,
        }
    }

    /// Placeholder for a revision known from a remote descriptor
    pub fn shallow(dto: &RevisionDto) -> Self {
        Self {
            sync_state: SyncState::ShallowCopy,
            ..Self::with_id(dto.id.clone(), dto.message.clone(), dto.timestamp)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Creation time in epoch milliseconds
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn items(&self) -> &[RevisionItem] {
        &self.deltas
    }

    pub fn children(&self) -> &[Revision] {
        &self.children
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync_state
    }

    pub(crate) fn set_sync_state(&mut self, state: SyncState) {
        self.sync_state = state;
    }

    pub fn is_shallow_copy(&self) -> bool {
        self.sync_state == SyncState::ShallowCopy
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty() && self.children.is_empty()
    }

    /// Append a child and point it back to this node.
    /// Returns false, leaving the tree untouched, if a child with the same id is already here.
    pub fn add_child(&mut self, mut child: Revision) -> bool {
        if self.children.iter().any(|c| c.id == child.id) {
            return false;
        }
        child.parent_id = Some(self.id.clone());
        self.children.push(child);
        true
    }

    /// Detach a direct child by id
    pub fn remove_child(&mut self, id: &str) -> Option<Revision> {
        let index = self.children.iter().position(|c| c.id == id)?;
        let mut child = self.children.remove(index);
        child.parent_id = None;
        Some(child)
    }

    /// Add a delta, superseding any delta with the same key
    pub fn add_item(&mut self, item: RevisionItem) {
        match self.deltas.iter_mut().find(|d| d.id == item.id) {
            Some(existing) => *existing = item,
            None => self.deltas.push(item),
        }
    }

    /// Take over the deltas of another revision, upgrading a shallow copy
    pub fn copy_deltas_from(&mut self, other: &Revision) {
        self.deltas = other.deltas.clone();
        self.sync_state = SyncState::FullSync;
    }

    /// Delta-only document: no metadata, no children
    pub fn serialize_deltas(&self) -> Result<Value> {
        Ok(json!({ "deltas": serde_json::to_value(&self.deltas)? }))
    }

    /// Replace the deltas from a delta-only document.
    /// Accepts both `{"deltas": [...]}` and a bare array.
    pub fn deserialize_deltas(&mut self, data: &Value) -> Result<()> {
        let list = match data {
            Value::Array(_) => data,
            Value::Object(map) => map.get("deltas").ok_or_else(|| {
                VcsError::Serialization("Delta document has no deltas".to_string())
            })?,
            _ => {
                return Err(VcsError::Serialization(
                    "Delta document must be an object or an array".to_string(),
                ));
            }
        };
        self.deltas = serde_json::from_value(list.clone())?;
        Ok(())
    }

    /// Full document of this node and its whole subtree
    pub fn serialize(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rebuild a subtree from a full document; parent links are restored,
    /// every node starts as `NoSync`.
    pub fn deserialize(data: &Value) -> Result<Revision> {
        let mut revision: Revision = serde_json::from_value(data.clone())?;
        if revision.id.is_empty() {
            return Err(VcsError::Serialization("Revision document has no id".to_string()));
        }
        revision.relink();
        Ok(revision)
    }

    pub(crate) fn relink(&mut self) {
        for child in &mut self.children {
            child.parent_id = Some(self.id.clone());
            child.relink();
        }
    }

    /// Depth-first search by id
    pub fn find(&self, id: &str) -> Option<&Revision> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Revision> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    /// Chain of revisions from this node down to `id`, both ends included
    pub fn path_to(&self, id: &str) -> Option<Vec<&Revision>> {
        if self.id == id {
            return Some(vec![self]);
        }
        for child in &self.children {
            if let Some(mut path) = child.path_to(id) {
                path.insert(0, self);
                return Some(path);
            }
        }
        None
    }

    /// Pre-order traversal of the subtree, this node first
    pub fn iter(&self) -> PreOrder<'_> {
        PreOrder { stack: vec![self] }
    }

    pub fn for_each_mut(&mut self, f: &mut impl FnMut(&mut Revision)) {
        f(self);
        for child in &mut self.children {
            child.for_each_mut(f);
        }
    }

    /// Number of nodes in the subtree
    pub fn subtree_size(&self) -> usize {
        self.iter().count()
    }
}

impl PartialEq for Revision {
    /// Structural equality; the transient sync state is not compared
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.message == other.message
            && self.timestamp == other.timestamp
            && self.parent_id == other.parent_id
            && self.deltas == other.deltas
            && self.children == other.children
    }
}

/// Pre-order iterator over a revision subtree
pub struct PreOrder<'a> {
    stack: Vec<&'a Revision>,
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = &'a Revision;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.children.iter().rev());
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::category;

    fn item(id: &str, notes: &[u8]) -> RevisionItem {
        RevisionItem::new(id, category::PIANO_TRACK, id, json!({ "notes": notes }))
    }

    fn sample_tree() -> Revision {
        let mut root = Revision::with_id("r", "root", 1);
        root.add_item(item("t1", &[60]));
        let mut a = Revision::with_id("a", "first", 2);
        a.add_item(item("t1", &[60, 62]));
        let mut b = Revision::with_id("b", "second", 3);
        b.add_item(item("t2", &[40]));
        a.add_child(b);
        root.add_child(a);
        root.add_child(Revision::with_id("c", "branch", 4));
        root
    }

    #[test]
    fn test_add_child_sets_parent_and_is_idempotent() {
        let mut root = Revision::with_id("r", "root", 0);
        assert!(root.add_child(Revision::with_id("a", "a", 1)));
        assert!(!root.add_child(Revision::with_id("a", "again", 2)));
        assert_eq!(root.children().len(), 1);
        assert_eq!(root.children()[0].parent_id(), Some("r"));
        assert_eq!(root.children()[0].message(), "a");
    }

    #[test]
    fn test_remove_child() {
        let mut root = sample_tree();
        let removed = root.remove_child("c").unwrap();
        assert_eq!(removed.parent_id(), None);
        assert!(root.remove_child("c").is_none());
        assert!(root.remove_child("b").is_none()); // not a direct child
        assert_eq!(root.subtree_size(), 3);
    }

    #[test]
    fn test_add_item_supersedes_same_key() {
        let mut rev = Revision::with_id("r", "", 0);
        rev.add_item(item("t1", &[1]));
        rev.add_item(item("t2", &[2]));
        rev.add_item(item("t1", &[3]));
        assert_eq!(rev.items().len(), 2);
        assert_eq!(rev.items()[0].payload, json!({ "notes": [3] }));
    }

    #[test]
    fn test_pre_order_iteration() {
        let root = sample_tree();
        let ids: Vec<&str> = root.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["r", "a", "b", "c"]);
    }

    #[test]
    fn test_find_and_path() {
        let root = sample_tree();
        assert_eq!(root.find("b").unwrap().message(), "second");
        assert!(root.find("zzz").is_none());

        let path: Vec<&str> = root.path_to("b").unwrap().iter().map(|r| r.id()).collect();
        assert_eq!(path, vec!["r", "a", "b"]);
        assert!(root.path_to("zzz").is_none());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let root = sample_tree();
        let doc = root.serialize().unwrap();
        let restored = Revision::deserialize(&doc).unwrap();
        assert_eq!(restored, root);
        assert_eq!(restored.find("b").unwrap().parent_id(), Some("a"));
    }

    #[test]
    fn test_deserialize_tolerates_missing_optional_fields() {
        let doc = json!({ "id": "r", "children": [{ "id": "a" }] });
        let root = Revision::deserialize(&doc).unwrap();
        assert_eq!(root.children()[0].message(), "");
        assert_eq!(root.children()[0].timestamp(), 0);
        assert!(Revision::deserialize(&json!({ "message": "no id" })).is_err());
    }

    #[test]
    fn test_deltas_roundtrip_upgrades_shallow_copy() {
        let source = sample_tree();
        let payload = source.find("a").unwrap().serialize_deltas().unwrap();
        assert!(payload.get("children").is_none());

        let dto = RevisionDto {
            id: "a".into(),
            parent_id: Some("r".into()),
            timestamp: 2,
            message: "first".into(),
            data: None,
        };
        let mut shallow = Revision::shallow(&dto);
        assert!(shallow.is_shallow_copy());

        let mut fetched = Revision::with_id("a", "", 0);
        fetched.deserialize_deltas(&payload).unwrap();
        shallow.copy_deltas_from(&fetched);

        assert_eq!(shallow.sync_state(), SyncState::FullSync);
        assert_eq!(shallow.items(), source.find("a").unwrap().items());
    }

    #[test]
    fn test_deserialize_deltas_accepts_bare_array() {
        let mut rev = Revision::with_id("r", "", 0);
        rev.deserialize_deltas(&json!([{ "id": "t1", "kind": "removed" }])).unwrap();
        assert_eq!(rev.items().len(), 1);
        assert!(rev.deserialize_deltas(&json!("nope")).is_err());
    }
}
