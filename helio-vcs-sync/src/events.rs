//! Messages from the sync worker to the owner thread, and the callbacks they end in.

use helio_vcs_core::{RemoteBranch, Revision, RevisionDto};
use serde_json::Value;

/// Step a session is at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    FetchingProjectHead,
    CreatingProject,
    ReconcileDone,
    PullingRevisions,
    PushingRevisions,
    UpdatingHeadPointer,
    DeletingProject,
    Done,
    Failed,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::FetchingProjectHead => "fetching project head",
            SyncPhase::CreatingProject => "creating project",
            SyncPhase::ReconcileDone => "reconciled",
            SyncPhase::PullingRevisions => "pulling revisions",
            SyncPhase::PushingRevisions => "pushing revisions",
            SyncPhase::UpdatingHeadPointer => "updating head pointer",
            SyncPhase::DeletingProject => "deleting project",
            SyncPhase::Done => "done",
            SyncPhase::Failed => "failed",
        }
    }
}

/// Remote project metadata, as last reported by the remote
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteProjectInfo {
    pub id: String,
    pub title: String,
    pub head: Option<String>,
}

/// One completed step of a session. Tree mutations travel as data and are
/// applied by the owner thread when it drains the queue.
#[derive(Debug)]
pub enum SyncEvent {
    Phase(SyncPhase),
    RemoteProject(RemoteProjectInfo),
    /// Fresh remote listing for the remote sync cache
    RemoteRevisions(Vec<RevisionDto>),
    /// Shallow subtrees to graft onto local revisions
    SubtreesFetched(Vec<RemoteBranch>),
    FetchDone,
    RevisionPulled { id: String, data: Value },
    RevisionPushed { id: String },
    HistoryReplaced(Revision),
    CloneDone { head: Option<String> },
    DeleteDone,
    SyncDone { nothing_to_sync: bool },
    SyncFailed(Vec<String>),
    /// Last message of every session
    Finished { session: u64 },
}

/// Session callbacks, fired on the owner thread. Every method defaults to a no-op.
#[allow(unused_variables)]
pub trait SyncListener {
    fn on_project_info(&mut self, project: &RemoteProjectInfo) {}

    fn on_fetch_done(&mut self) {}

    fn on_sync_done(&mut self, nothing_to_sync: bool) {}

    fn on_sync_failed(&mut self, errors: &[String]) {}

    fn on_revision_pulled(&mut self, revision: &Revision) {}

    fn on_revision_pushed(&mut self, revision: &Revision) {}

    fn on_clone_done(&mut self) {}

    fn on_delete_done(&mut self) {}
}

impl SyncListener for () {}
