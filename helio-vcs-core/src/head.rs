//! Head pointer and the stage.
//!
//! The head knows which revision is checked out and the accumulated state of
//! the project at that revision (every delta from the root down to the head,
//! folded in order). The stage is the list of changes between that state and
//! the live project, always computed relative to the head.

use crate::error::{Result, VcsError};
use crate::item::{ChangeKind, RevisionItem};
use crate::project::TrackedItemsSource;
use crate::revision::Revision;
use tracing::debug;

/// Checked-out revision, its accumulated state and the current stage
#[derive(Debug, Clone)]
pub struct Head {
    revision_id: String,
    snapshot: Vec<RevisionItem>,
    diff: Vec<RevisionItem>,
    diff_outdated: bool,
}

impl Head {
    /// Head pointing at the root revision of `tree`
    pub fn new(tree: &Revision) -> Self {
        Self {
            revision_id: tree.id().to_string(),
            snapshot: Self::fold(&[tree]),
            diff: Vec::new(),
            diff_outdated: true,
        }
    }

    pub fn revision_id(&self) -> &str {
        &self.revision_id
    }

    /// Accumulated project state at the head revision
    pub fn snapshot(&self) -> &[RevisionItem] {
        &self.snapshot
    }

    /// Move the head to revision `id` of `tree` and mark the stage outdated
    pub fn move_to(&mut self, tree: &Revision, id: &str) -> Result<()> {
        let path = tree
            .path_to(id)
            .ok_or_else(|| VcsError::NotFound(id.to_string()))?;
        if let Some(shallow) = path.iter().find(|r| r.is_shallow_copy()) {
            return Err(VcsError::ShallowRevision(shallow.id().to_string()));
        }
        self.snapshot = Self::fold(&path);
        self.revision_id = id.to_string();
        self.diff_outdated = true;
        Ok(())
    }

    /// Recompute the accumulated state after the head revision's own deltas changed
    pub fn refresh(&mut self, tree: &Revision) -> Result<()> {
        let id = self.revision_id.clone();
        self.move_to(tree, &id)
    }

    fn fold(path: &[&Revision]) -> Vec<RevisionItem> {
        let mut state: Vec<RevisionItem> = Vec::new();
        for revision in path {
            for delta in revision.items() {
                let position = state.iter().position(|s| s.id == delta.id);
                match (delta.kind, position) {
                    (ChangeKind::Removed, Some(i)) => {
                        state.remove(i);
                    }
                    (ChangeKind::Removed, None) => {}
                    (_, Some(i)) => state[i] = delta.with_kind(ChangeKind::Added),
                    (_, None) => state.push(delta.with_kind(ChangeKind::Added)),
                }
            }
        }
        state
    }

    pub fn is_diff_outdated(&self) -> bool {
        self.diff_outdated
    }

    pub fn set_diff_outdated(&mut self, outdated: bool) {
        self.diff_outdated = outdated;
    }

    /// Recompute the stage from the live project state
    pub fn rebuild_diff(&mut self, source: &dyn TrackedItemsSource) {
        let working = source.current_state();
        let mut diff = Vec::new();

        for state_item in &self.snapshot {
            match working.iter().find(|w| w.id == state_item.id) {
                Some(current) if !current.same_state_as(state_item) => {
                    diff.push(current.with_kind(ChangeKind::Changed));
                }
                Some(_) => {}
                None => diff.push(state_item.with_kind(ChangeKind::Removed)),
            }
        }

        for current in &working {
            if !self.snapshot.iter().any(|s| s.id == current.id) {
                diff.push(current.with_kind(ChangeKind::Added));
            }
        }

        debug!(
            "Stage rebuilt against {}: {} change(s)",
            self.revision_id,
            diff.len()
        );
        self.diff = diff;
        self.diff_outdated = false;
    }

    /// Recompute the stage only if something marked it outdated
    pub fn rebuild_diff_if_needed(&mut self, source: &dyn TrackedItemsSource) -> bool {
        if self.diff_outdated {
            self.rebuild_diff(source);
            return true;
        }
        false
    }

    pub fn diff(&self) -> &[RevisionItem] {
        &self.diff
    }

    pub fn diff_has_changes(&self) -> bool {
        !self.diff.is_empty()
    }

    /// Deltas that bring the live state back to the head state for the given staged items
    pub fn reverting_deltas(&self, staged: &[RevisionItem]) -> Vec<RevisionItem> {
        staged
            .iter()
            .filter_map(|item| {
                let base = self.snapshot.iter().find(|s| s.id == item.id);
                match (item.kind, base) {
                    (ChangeKind::Added, _) => Some(item.with_kind(ChangeKind::Removed)),
                    (ChangeKind::Changed, Some(base)) => Some(base.with_kind(ChangeKind::Changed)),
                    (ChangeKind::Removed, Some(base)) => Some(base.with_kind(ChangeKind::Added)),
                    (_, None) => None,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::category;
    use crate::project::InMemoryProject;
    use serde_json::json;

    fn track(id: &str, value: i64) -> RevisionItem {
        RevisionItem::new(id, category::PIANO_TRACK, id, json!(value))
    }

    fn history() -> Revision {
        let mut root = Revision::with_id("root", "init", 0);
        root.add_item(track("a", 1));
        root.add_item(track("b", 1));
        let mut second = Revision::with_id("second", "edit", 1);
        second.add_item(track("a", 2).with_kind(ChangeKind::Changed));
        second.add_item(track("b", 1).with_kind(ChangeKind::Removed));
        second.add_item(track("c", 1));
        root.add_child(second);
        root
    }

    #[test]
    fn test_snapshot_folds_path() {
        let tree = history();
        let mut head = Head::new(&tree);
        assert_eq!(head.snapshot().len(), 2);

        head.move_to(&tree, "second").unwrap();
        let state: Vec<(&str, &serde_json::Value)> =
            head.snapshot().iter().map(|s| (s.id.as_str(), &s.payload)).collect();
        assert_eq!(state, vec![("a", &json!(2)), ("c", &json!(1))]);
        assert!(head.snapshot().iter().all(|s| s.kind == ChangeKind::Added));
    }

    #[test]
    fn test_move_to_unknown_revision() {
        let tree = history();
        let mut head = Head::new(&tree);
        assert!(matches!(head.move_to(&tree, "nope"), Err(VcsError::NotFound(_))));
        assert_eq!(head.revision_id(), "root");
    }

    #[test]
    fn test_diff_detects_all_change_kinds() {
        let tree = history();
        let mut head = Head::new(&tree);

        let mut project = InMemoryProject::new();
        project.upsert(track("a", 5));
        project.upsert(track("z", 1));

        head.rebuild_diff(&project);
        let diff: Vec<(&str, ChangeKind)> = head.diff().iter().map(|d| (d.id.as_str(), d.kind)).collect();
        assert_eq!(
            diff,
            vec![("a", ChangeKind::Changed), ("b", ChangeKind::Removed), ("z", ChangeKind::Added)]
        );
        assert!(!head.is_diff_outdated());
    }

    #[test]
    fn test_rebuild_if_needed_is_lazy() {
        let tree = history();
        let mut head = Head::new(&tree);
        let project = InMemoryProject::new();
        assert!(head.rebuild_diff_if_needed(&project));
        assert!(!head.rebuild_diff_if_needed(&project));
        head.set_diff_outdated(true);
        assert!(head.rebuild_diff_if_needed(&project));
    }

    #[test]
    fn test_reverting_deltas_restore_head_state() {
        let tree = history();
        let mut head = Head::new(&tree);
        let mut project = InMemoryProject::new();
        project.upsert(track("a", 5));
        project.upsert(track("z", 1));
        head.rebuild_diff(&project);

        let revert = head.reverting_deltas(head.diff());
        project.apply_deltas(&revert);
        head.rebuild_diff(&project);

        assert!(!head.diff_has_changes());
        assert_eq!(project.get("a").unwrap().payload, json!(1));
        assert!(project.get("b").is_some());
        assert!(project.get("z").is_none());
    }
}
