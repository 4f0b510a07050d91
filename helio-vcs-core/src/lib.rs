//! Helio VCS Core Library
//!
//! Per-project version control for the sequencer:
//! - Revision tree with delta payloads and sync states
//! - Stage computation against the checked-out head
//! - Commit, checkout, reset, cherry-pick and the quick stash
//! - Remote sync cache and remote descriptors
//! - Pure reconciliation of local and remote histories
//! - Sync settings

pub mod error;
pub mod item;
pub mod revision;
pub mod dto;
pub mod project;
pub mod head;
pub mod remote_cache;
pub mod reconcile;
pub mod version_control;
pub mod settings;

pub use error::{ReconcileError, Result, VcsError};
pub use item::{ChangeKind, RevisionItem, category};
pub use revision::{PreOrder, Revision, SyncState};
pub use dto::{ProjectDto, RevisionDto};
pub use project::{InMemoryProject, TrackedItemsSource};
pub use head::Head;
pub use remote_cache::RemoteCache;
pub use reconcile::{
    RemoteBranch, Reconciliation, build_local_index, build_remote_index, construct_new_local_trees,
    construct_remote_branches, construct_remote_tree, push_order, reconcile,
};
pub use version_control::{INITIAL_COMMIT_MESSAGE, QuickStashAction, VCS_KEY, VersionControl};
pub use settings::{DEFAULT_BASE_URL, SETTINGS_FILE, SyncSettings};
