//! The history owner.
//!
//! `VersionControl` owns the root revision (and through it the whole tree),
//! the head with its stage, the one-slot quick stash and the remote sync
//! cache. Every mutation of the tree goes through here, on the owner thread.

use crate::dto::RevisionDto;
use crate::error::{Result, VcsError};
use crate::head::Head;
use crate::item::RevisionItem;
use crate::project::TrackedItemsSource;
use crate::remote_cache::RemoteCache;
use crate::revision::{PreOrder, Revision, SyncState};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Message of the root revision of a new history
pub const INITIAL_COMMIT_MESSAGE: &str = "Project started";

/// Root key of the persisted history document
pub const VCS_KEY: &str = "vcs";

/// What [`VersionControl::toggle_quick_stash`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuickStashAction {
    Stashed,
    Restored,
    NothingToDo,
}

pub struct VersionControl {
    root: Revision,
    head: Head,
    quick_stash: Option<Vec<RevisionItem>>,
    remote_cache: RemoteCache,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VcsDocumentRef<'a> {
    head: &'a str,
    root: &'a Revision,
    quick_stash: Option<&'a Vec<RevisionItem>>,
    remote_cache: &'a RemoteCache,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VcsDocument {
    #[serde(default)]
    head: String,
    root: Revision,
    #[serde(default)]
    quick_stash: Option<Vec<RevisionItem>>,
    #[serde(default)]
    remote_cache: RemoteCache,
}

impl VersionControl {
    /// New history with a single, empty root revision
    pub fn new() -> Self {
        Self::with_root(Revision::new(INITIAL_COMMIT_MESSAGE))
    }

    pub fn with_root(root: Revision) -> Self {
        let head = Head::new(&root);
        Self {
            root,
            head,
            quick_stash: None,
            remote_cache: RemoteCache::new(),
        }
    }

    pub fn root(&self) -> &Revision {
        &self.root
    }

    /// The checked-out revision
    pub fn head(&self) -> &Revision {
        self.root.find(self.head.revision_id()).unwrap_or(&self.root)
    }

    pub fn head_id(&self) -> &str {
        self.head.revision_id()
    }

    pub fn head_state(&self) -> &Head {
        &self.head
    }

    pub fn find_revision(&self, id: &str) -> Option<&Revision> {
        self.root.find(id)
    }

    /// Every revision, parents before children
    pub fn revisions(&self) -> PreOrder<'_> {
        self.root.iter()
    }

    //===------------------------------------------------------------------===//
    // Stage
    //===------------------------------------------------------------------===//

    /// The live project changed; the stage will be recomputed on next use
    pub fn mark_diff_outdated(&mut self) {
        self.head.set_diff_outdated(true);
    }

    pub fn rebuild_diff(&mut self, source: &dyn TrackedItemsSource) {
        self.head.rebuild_diff(source);
    }

    pub fn rebuild_diff_if_needed(&mut self, source: &dyn TrackedItemsSource) -> bool {
        self.head.rebuild_diff_if_needed(source)
    }

    pub fn diff_has_changes(&self) -> bool {
        self.head.diff_has_changes()
    }

    /// Staged changes, in display order
    pub fn diff(&self) -> &[RevisionItem] {
        self.head.diff()
    }

    fn select(&self, selected: &[usize]) -> Result<Vec<RevisionItem>> {
        if selected.is_empty() {
            return Err(VcsError::EmptySelection);
        }
        let stage = self.head.diff();
        let indices: BTreeSet<usize> = selected.iter().copied().collect();
        indices
            .into_iter()
            .map(|index| {
                stage.get(index).cloned().ok_or(VcsError::IndexOutOfRange {
                    index,
                    len: stage.len(),
                })
            })
            .collect()
    }

    /// Turn the selected staged changes into a new child of head and move head onto it.
    /// Returns the new revision id.
    pub fn commit(
        &mut self,
        source: &dyn TrackedItemsSource,
        selected: &[usize],
        message: &str,
    ) -> Result<String> {
        self.head.rebuild_diff_if_needed(source);
        let items = self.select(selected)?;

        let mut revision = Revision::new(message);
        for item in items {
            revision.add_item(item);
        }
        let id = revision.id().to_string();

        let head_id = self.head.revision_id().to_string();
        let parent = self
            .root
            .find_mut(&head_id)
            .ok_or_else(|| VcsError::NotFound(head_id.clone()))?;
        parent.add_child(revision);

        self.head.move_to(&self.root, &id)?;
        self.head.rebuild_diff(source);
        info!("Committed {} on top of {} ({} item(s))", id, head_id, selected.len());
        Ok(id)
    }

    /// Commit everything on the stage
    pub fn commit_all(&mut self, source: &dyn TrackedItemsSource, message: &str) -> Result<String> {
        self.head.rebuild_diff(source);
        let all: Vec<usize> = (0..self.head.diff().len()).collect();
        self.commit(source, &all, message)
    }

    /// Discard the selected staged changes, reverting the live state to head
    pub fn reset_changes(
        &mut self,
        source: &mut dyn TrackedItemsSource,
        selected: &[usize],
    ) -> Result<()> {
        self.head.rebuild_diff_if_needed(source);
        let items = self.select(selected)?;
        let revert = self.head.reverting_deltas(&items);
        source.apply_deltas(&revert);
        self.head.rebuild_diff(source);
        Ok(())
    }

    pub fn reset_all_changes(&mut self, source: &mut dyn TrackedItemsSource) {
        self.head.rebuild_diff(source);
        let revert = self.head.reverting_deltas(self.head.diff());
        source.apply_deltas(&revert);
        self.head.rebuild_diff(source);
    }

    /// Move head to `id` and make the live state match it.
    /// Uncommitted changes are discarded; callers confirm that beforehand.
    pub fn checkout(&mut self, source: &mut dyn TrackedItemsSource, id: &str) -> Result<()> {
        self.head.move_to(&self.root, id)?;
        self.reset_all_changes(source);
        info!("Checked out {}", id);
        Ok(())
    }

    /// Apply some deltas of any revision onto the live state without moving head.
    /// An empty `item_ids` picks every delta. Returns how many were applied.
    pub fn cherry_pick(
        &mut self,
        source: &mut dyn TrackedItemsSource,
        revision_id: &str,
        item_ids: &[String],
    ) -> Result<usize> {
        let revision = self
            .root
            .find(revision_id)
            .ok_or_else(|| VcsError::NotFound(revision_id.to_string()))?;
        if revision.is_shallow_copy() {
            return Err(VcsError::ShallowRevision(revision_id.to_string()));
        }
        let picked: Vec<RevisionItem> = revision
            .items()
            .iter()
            .filter(|i| item_ids.is_empty() || item_ids.contains(&i.id))
            .cloned()
            .collect();
        source.apply_deltas(&picked);
        self.head.rebuild_diff(source);
        Ok(picked.len())
    }

    //===------------------------------------------------------------------===//
    // Quick stash
    //===------------------------------------------------------------------===//

    pub fn has_quick_stash(&self) -> bool {
        self.quick_stash.is_some()
    }

    pub fn quick_stash(&self) -> Option<&[RevisionItem]> {
        self.quick_stash.as_deref()
    }

    /// Move the whole stage aside and revert the live state to head
    pub fn quick_stash_all(&mut self, source: &mut dyn TrackedItemsSource) -> Result<()> {
        if self.has_quick_stash() {
            return Err(VcsError::QuickStashExists);
        }
        self.head.rebuild_diff(source);
        if !self.head.diff_has_changes() {
            return Err(VcsError::NothingToStash);
        }
        self.quick_stash = Some(self.head.diff().to_vec());
        self.reset_all_changes(source);
        debug!("Quick stash holds {} change(s)", self.quick_stash().map_or(0, |s| s.len()));
        Ok(())
    }

    /// Bring the stashed changes back onto a clean live state
    pub fn restore_quick_stash(&mut self, source: &mut dyn TrackedItemsSource) -> Result<()> {
        if !self.has_quick_stash() {
            return Err(VcsError::NoQuickStash);
        }
        self.head.rebuild_diff(source);
        if self.head.diff_has_changes() {
            return Err(VcsError::QuickStashConflict);
        }
        if let Some(stash) = self.quick_stash.take() {
            source.apply_deltas(&stash);
        }
        self.head.rebuild_diff(source);
        Ok(())
    }

    /// Stash when there are changes, restore when there is a stash.
    /// Having both at once is refused and leaves everything untouched.
    pub fn toggle_quick_stash(
        &mut self,
        source: &mut dyn TrackedItemsSource,
    ) -> Result<QuickStashAction> {
        self.head.rebuild_diff(source);
        match (self.has_quick_stash(), self.head.diff_has_changes()) {
            (false, false) => Ok(QuickStashAction::NothingToDo),
            (false, true) => self.quick_stash_all(source).map(|_| QuickStashAction::Stashed),
            (true, false) => self.restore_quick_stash(source).map(|_| QuickStashAction::Restored),
            (true, true) => {
                warn!("Refusing to toggle quick stash: both a stash and uncommitted changes exist");
                Err(VcsError::QuickStashConflict)
            }
        }
    }

    //===------------------------------------------------------------------===//
    // Sync
    //===------------------------------------------------------------------===//

    pub fn remote_cache(&self) -> &RemoteCache {
        &self.remote_cache
    }

    /// Replace the cache with a fresh remote listing
    pub fn update_remote_sync_cache(&mut self, revisions: &[RevisionDto]) {
        self.remote_cache.update_for_remote_revisions(revisions);
        self.refresh_sync_states(false);
    }

    /// Mark a just-pushed local revision as known remotely
    pub fn update_local_sync_cache(&mut self, id: &str) -> Result<()> {
        let revision = self
            .root
            .find_mut(id)
            .ok_or_else(|| VcsError::NotFound(id.to_string()))?;
        if revision.is_shallow_copy() {
            return Err(VcsError::ShallowRevision(id.to_string()));
        }
        revision.set_sync_state(SyncState::FullSync);
        self.remote_cache.update_for_local_revision(revision);
        Ok(())
    }

    /// Fill a shallow revision with its fetched deltas
    pub fn update_shallow_revision_data(&mut self, id: &str, payload: &Value) -> Result<&Revision> {
        let mut fetched = Revision::with_id(id, "", 0);
        fetched.deserialize_deltas(payload)?;

        let target = self
            .root
            .find_mut(id)
            .ok_or_else(|| VcsError::NotFound(id.to_string()))?;
        if !target.is_shallow_copy() {
            warn!("Refusing to overwrite deltas of revision {}, it is not a shallow copy", id);
            return Err(VcsError::StructuralInconsistency(format!(
                "revision {} is not a shallow copy",
                id
            )));
        }
        target.copy_deltas_from(&fetched);

        let on_head_path = self
            .root
            .path_to(self.head.revision_id())
            .is_some_and(|path| path.iter().any(|r| r.id() == id));
        if on_head_path && self.head.refresh(&self.root).is_ok() {
            self.head.set_diff_outdated(true);
        }

        self.root
            .find(id)
            .ok_or_else(|| VcsError::NotFound(id.to_string()))
    }

    /// Swap the whole tree, as done by a full clone. Head moves to the new
    /// root; callers check out the revision they want afterwards.
    pub fn replace_history(&mut self, new_root: Revision) {
        info!("Replacing history with {} revision(s)", new_root.subtree_size());
        self.root = new_root;
        self.head = Head::new(&self.root);
        self.refresh_sync_states(false);
    }

    /// Graft a subtree under the local revision `parent_id`
    pub fn append_subtree(&mut self, subtree: Revision, parent_id: &str) -> bool {
        let subtree_id = subtree.id().to_string();
        match self.root.find_mut(parent_id) {
            Some(parent) => {
                if parent.add_child(subtree) {
                    debug!("Appended subtree {} under {}", subtree_id, parent_id);
                    true
                } else {
                    warn!("Subtree {} is already a child of {}", subtree_id, parent_id);
                    false
                }
            }
            None => {
                warn!(
                    "Cannot append subtree {}: revision {} not found locally",
                    subtree_id, parent_id
                );
                false
            }
        }
    }

    pub fn revision_sync_state(&self, id: &str) -> Option<SyncState> {
        self.root.find(id).map(Revision::sync_state)
    }

    fn refresh_sync_states(&mut self, detect_shallow: bool) {
        let cache = &self.remote_cache;
        let root_id = self.root.id().to_string();
        self.root.for_each_mut(&mut |revision| {
            let tracked = cache.has_revision_tracked(revision.id());
            let state = if revision.is_shallow_copy()
                || (detect_shallow && tracked && revision.items().is_empty() && revision.id() != root_id)
            {
                SyncState::ShallowCopy
            } else if tracked {
                SyncState::FullSync
            } else {
                SyncState::NoSync
            };
            revision.set_sync_state(state);
        });
    }

    //===------------------------------------------------------------------===//
    // Persistence
    //===------------------------------------------------------------------===//

    /// Document of the whole history under the `vcs` key
    pub fn serialize(&self) -> Result<Value> {
        let document = VcsDocumentRef {
            head: self.head.revision_id(),
            root: &self.root,
            quick_stash: self.quick_stash.as_ref(),
            remote_cache: &self.remote_cache,
        };
        Ok(json!({ VCS_KEY: serde_json::to_value(document)? }))
    }

    /// Restore from a document produced by [`VersionControl::serialize`].
    /// The stage starts outdated; a missing head falls back to the root.
    pub fn deserialize(data: &Value) -> Result<Self> {
        let inner = data.get(VCS_KEY).unwrap_or(data);
        let mut document: VcsDocument = serde_json::from_value(inner.clone())?;
        if document.root.id().is_empty() {
            return Err(VcsError::StructuralInconsistency("history has no root revision id".to_string()));
        }
        document.root.relink();

        let mut vcs = Self::with_root(document.root);
        vcs.quick_stash = document.quick_stash;
        vcs.remote_cache = document.remote_cache;
        vcs.refresh_sync_states(true);

        if !document.head.is_empty() {
            if let Err(e) = vcs.head.move_to(&vcs.root, &document.head) {
                warn!("Stored head {} is unusable ({}), staying at root", document.head, e);
            }
        }
        Ok(vcs)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_string_pretty(&self.serialize()?)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&data)?;
        Self::deserialize(&value)
    }
}

impl Default for VersionControl {
    fn default() -> Self {
        Self::new()
    }
}
