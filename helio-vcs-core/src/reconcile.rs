//! Local/remote history reconciliation.
//!
//! Pure functions, no I/O: given the local tree and the flat list of remote
//! revision descriptors, work out what is missing on each side and how the
//! missing pieces fit into trees.

use crate::dto::RevisionDto;
use crate::error::ReconcileError;
use crate::revision::Revision;
use std::collections::{HashMap, HashSet};

/// Index of the local tree by revision id
pub fn build_local_index(root: &Revision) -> HashMap<&str, &Revision> {
    root.iter().map(|r| (r.id(), r)).collect()
}

/// Index of remote descriptors by revision id; the first descriptor wins on duplicates
pub fn build_remote_index(descriptors: &[RevisionDto]) -> HashMap<&str, &RevisionDto> {
    let mut index = HashMap::with_capacity(descriptors.len());
    for dto in descriptors {
        index.entry(dto.id.as_str()).or_insert(dto);
    }
    index
}

/// What each side lacks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Remote descriptors unknown locally, in remote listing order
    pub new_on_remote: Vec<RevisionDto>,
    /// Ids of local revisions unknown remotely, parents before children
    pub new_locally: Vec<String>,
}

impl Reconciliation {
    pub fn is_up_to_date(&self) -> bool {
        self.new_on_remote.is_empty() && self.new_locally.is_empty()
    }
}

pub fn reconcile(root: &Revision, remote: &[RevisionDto]) -> Reconciliation {
    let local_index = build_local_index(root);
    let remote_index = build_remote_index(remote);

    let mut seen = HashSet::new();
    let mut new_on_remote = Vec::new();
    for dto in remote {
        if !local_index.contains_key(dto.id.as_str()) && seen.insert(dto.id.as_str()) {
            new_on_remote.push(dto.clone());
        }
    }

    let new_locally = root
        .iter()
        .filter(|r| !remote_index.contains_key(r.id()))
        .map(|r| r.id().to_string())
        .collect();

    Reconciliation {
        new_on_remote,
        new_locally,
    }
}

/// A subtree of shallow revisions and the local revision it hangs from
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteBranch {
    /// Parent id of the subtree root; `None` for a remote root revision
    pub mount_id: Option<String>,
    pub root: Revision,
}

/// Link shallow copies of the given descriptors into subtrees.
///
/// Every descriptor ends up in exactly one returned subtree. Subtrees come
/// out in the order their roots appear in the input, so siblings mounted on
/// the same parent are all kept.
pub fn construct_remote_branches(
    descriptors: &[RevisionDto],
) -> Result<Vec<RemoteBranch>, ReconcileError> {
    let index = build_remote_index(descriptors);

    let mut children: HashMap<&str, Vec<&RevisionDto>> = HashMap::new();
    let mut roots: Vec<&RevisionDto> = Vec::new();
    let mut listed = HashSet::new();
    for dto in descriptors {
        if !listed.insert(dto.id.as_str()) {
            continue;
        }
        match dto.parent_id() {
            Some(parent) if index.contains_key(parent) => {
                children.entry(parent).or_default().push(dto);
            }
            _ => roots.push(dto),
        }
    }

    let mut linked = HashSet::new();
    let branches: Vec<RemoteBranch> = roots
        .into_iter()
        .map(|dto| RemoteBranch {
            mount_id: dto.parent_id.clone(),
            root: link_shallow(dto, &children, &mut linked),
        })
        .collect();

    if linked.len() != listed.len() {
        let mut stray: Vec<String> = listed
            .difference(&linked)
            .map(|id| id.to_string())
            .collect();
        stray.sort();
        return Err(ReconcileError::Cycle(stray));
    }

    Ok(branches)
}

fn link_shallow<'a>(
    dto: &'a RevisionDto,
    children: &HashMap<&str, Vec<&'a RevisionDto>>,
    linked: &mut HashSet<&'a str>,
) -> Revision {
    linked.insert(dto.id.as_str());
    let mut revision = Revision::shallow(dto);
    for child in children.get(dto.id.as_str()).into_iter().flatten() {
        if !linked.contains(child.id.as_str()) {
            revision.add_child(link_shallow(child, children, linked));
        }
    }
    revision
}

/// Fold a complete remote history into one tree, for a full clone
pub fn construct_remote_tree(descriptors: &[RevisionDto]) -> Result<Revision, ReconcileError> {
    let mut branches = construct_remote_branches(descriptors)?;
    match branches.len() {
        0 => Err(ReconcileError::NoRoot),
        1 => Ok(branches.remove(0).root),
        _ => Err(ReconcileError::MultipleRoots(
            branches.iter().map(|b| b.root.id().to_string()).collect(),
        )),
    }
}

/// Roots of the local subtrees made of new revisions: those whose parent is not new itself
pub fn construct_new_local_trees<'a>(root: &'a Revision, new_locally: &[String]) -> Vec<&'a Revision> {
    let new: HashSet<&str> = new_locally.iter().map(String::as_str).collect();
    root.iter()
        .filter(|r| new.contains(r.id()))
        .filter(|r| r.parent_id().is_none_or(|p| !new.contains(p)))
        .collect()
}

/// New local revisions in the order they must reach the remote: every
/// parent strictly before its descendants. A non-empty `only` restricts
/// the result to those ids, still walking through the ones left out.
pub fn push_order<'a>(root: &'a Revision, new_locally: &[String], only: &[String]) -> Vec<&'a Revision> {
    let new: HashSet<&str> = new_locally.iter().map(String::as_str).collect();
    let mut order = Vec::new();
    for tree in construct_new_local_trees(root, new_locally) {
        collect_push_order(tree, &new, only, &mut order);
    }
    order
}

fn collect_push_order<'a>(
    revision: &'a Revision,
    new: &HashSet<&str>,
    only: &[String],
    order: &mut Vec<&'a Revision>,
) {
    if only.is_empty() || only.iter().any(|id| id == revision.id()) {
        order.push(revision);
    }
    for child in revision.children() {
        if new.contains(child.id()) {
            collect_push_order(child, new, only, order);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dto(id: &str, parent: &str) -> RevisionDto {
        RevisionDto {
            id: id.to_string(),
            parent_id: (!parent.is_empty()).then(|| parent.to_string()),
            timestamp: 0,
            message: format!("rev {}", id),
            data: None,
        }
    }

    fn ids(revisions: &[&Revision]) -> Vec<String> {
        revisions.iter().map(|r| r.id().to_string()).collect()
    }

    #[test]
    fn test_remote_chain_grafts_on_local_root() {
        let local = Revision::with_id("A", "root", 0);
        let remote = vec![dto("A", ""), dto("B", "A"), dto("C", "B")];

        let diff = reconcile(&local, &remote);
        assert!(diff.new_locally.is_empty());
        assert_eq!(diff.new_on_remote.len(), 2);

        let branches = construct_remote_branches(&diff.new_on_remote).unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].mount_id.as_deref(), Some("A"));

        let b = &branches[0].root;
        assert_eq!(b.id(), "B");
        assert!(b.is_shallow_copy());
        assert_eq!(b.children().len(), 1);
        assert_eq!(b.children()[0].id(), "C");
        assert!(b.children()[0].is_shallow_copy());
        assert_eq!(b.children()[0].parent_id(), Some("B"));
    }

    #[test]
    fn test_sibling_subtrees_on_same_mount_are_kept() {
        let remote = vec![dto("B", "A"), dto("C", "A"), dto("D", "C")];
        let branches = construct_remote_branches(&remote).unwrap();
        let roots: Vec<&str> = branches.iter().map(|b| b.root.id()).collect();
        assert_eq!(roots, vec!["B", "C"]);
        assert!(branches.iter().all(|b| b.mount_id.as_deref() == Some("A")));
        let total: usize = branches.iter().map(|b| b.root.subtree_size()).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_children_listed_before_parents() {
        let remote = vec![dto("C", "B"), dto("B", "A")];
        let branches = construct_remote_branches(&remote).unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].root.id(), "B");
        assert!(branches[0].root.find("C").is_some());
    }

    #[test]
    fn test_cycle_is_reported() {
        let remote = vec![dto("X", "Y"), dto("Y", "X"), dto("Z", "")];
        let err = construct_remote_branches(&remote).unwrap_err();
        assert_eq!(err, ReconcileError::Cycle(vec!["X".to_string(), "Y".to_string()]));
    }

    #[test]
    fn test_remote_tree_single_root() {
        let tree = construct_remote_tree(&[dto("1", ""), dto("2", "1")]).unwrap();
        assert_eq!(tree.id(), "1");
        assert_eq!(tree.children().len(), 1);
        assert_eq!(tree.children()[0].id(), "2");
    }

    #[test]
    fn test_remote_tree_rejects_multiple_or_no_roots() {
        assert_eq!(
            construct_remote_tree(&[dto("1", ""), dto("2", "")]),
            Err(ReconcileError::MultipleRoots(vec!["1".to_string(), "2".to_string()]))
        );
        assert_eq!(construct_remote_tree(&[]), Err(ReconcileError::NoRoot));
    }

    #[test]
    fn test_duplicate_descriptors_are_collapsed() {
        let remote = vec![dto("1", ""), dto("2", "1"), dto("2", "1")];
        let tree = construct_remote_tree(&remote).unwrap();
        assert_eq!(tree.subtree_size(), 2);
    }

    fn local_history() -> Revision {
        // R -> A -> B
        //        -> C -> D
        let mut r = Revision::with_id("R", "", 0);
        let mut a = Revision::with_id("A", "", 1);
        a.add_child(Revision::with_id("B", "", 2));
        let mut c = Revision::with_id("C", "", 3);
        c.add_child(Revision::with_id("D", "", 4));
        a.add_child(c);
        r.add_child(a);
        r
    }

    #[test]
    fn test_new_local_trees_and_push_order() {
        let local = local_history();
        let remote = vec![dto("R", ""), dto("A", "R"), dto("B", "A")];
        let diff = reconcile(&local, &remote);
        assert_eq!(diff.new_locally, vec!["C".to_string(), "D".to_string()]);

        let trees = construct_new_local_trees(&local, &diff.new_locally);
        assert_eq!(ids(&trees), vec!["C"]);

        let order = push_order(&local, &diff.new_locally, &[]);
        assert_eq!(ids(&order), vec!["C", "D"]);
    }

    #[test]
    fn test_push_order_with_filter_walks_through_skipped() {
        let local = local_history();
        let new = vec!["A".to_string(), "B".to_string(), "C".to_string(), "D".to_string()];
        let order = push_order(&local, &new, &["D".to_string()]);
        assert_eq!(ids(&order), vec!["D"]);
    }

    #[test]
    fn test_up_to_date() {
        let local = local_history();
        let remote: Vec<RevisionDto> = local.iter().map(RevisionDto::from_revision).collect();
        assert!(reconcile(&local, &remote).is_up_to_date());
    }
}
