//! The sync worker: one session of network round trips.
//!
//! A worker runs on its own thread against a snapshot of the local history
//! taken when the session started. It never touches the owner's tree; every
//! completed step is posted as a [`SyncEvent`] and applied by the owner.

use crate::error::SyncError;
use crate::events::{RemoteProjectInfo, SyncEvent, SyncPhase};
use crate::transport::{Method, Response, Transport, routes};
use helio_vcs_core::{
    ProjectDto, Revision, RevisionDto, VcsError, build_local_index, construct_remote_branches,
    construct_remote_tree, push_order, reconcile,
};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// What a session does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionKind {
    /// Graft new remote revisions as shallow copies, push nothing
    Fetch,
    /// Full bidirectional sync; non-empty id lists restrict each direction
    Sync {
        ids_to_pull: Vec<String>,
        ids_to_push: Vec<String>,
    },
    /// Replace the local history with the remote one
    Clone,
    /// Remove the project from the remote
    Delete,
}

impl SessionKind {
    pub fn name(&self) -> &'static str {
        match self {
            SessionKind::Fetch => "fetch",
            SessionKind::Sync { .. } => "sync",
            SessionKind::Clone => "clone",
            SessionKind::Delete => "delete",
        }
    }
}

/// Everything a session needs, owned by the worker
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub kind: SessionKind,
    pub project_id: String,
    pub project_title: String,
    /// Local history as of session start
    pub root: Revision,
    pub head_id: String,
}

pub(crate) struct SyncWorker {
    session: u64,
    transport: Arc<dyn Transport>,
    events: UnboundedSender<SyncEvent>,
    cancel: Arc<AtomicBool>,
    request: SessionRequest,
}

impl SyncWorker {
    pub(crate) fn new(
        session: u64,
        transport: Arc<dyn Transport>,
        events: UnboundedSender<SyncEvent>,
        cancel: Arc<AtomicBool>,
        request: SessionRequest,
    ) -> Self {
        Self {
            session,
            transport,
            events,
            cancel,
            request,
        }
    }

    /// Run the session to completion, reporting failure and always ending with `Finished`
    pub(crate) async fn run(self) {
        let kind = self.request.kind.clone();
        info!(
            "Starting {} session for project {}",
            kind.name(),
            self.request.project_id
        );

        let result = match &kind {
            SessionKind::Fetch => self.sync(true, &[], &[]).await,
            SessionKind::Sync {
                ids_to_pull,
                ids_to_push,
            } => self.sync(false, ids_to_pull, ids_to_push).await,
            SessionKind::Clone => self.clone_project().await,
            SessionKind::Delete => self.delete_project().await,
        };

        match result {
            Ok(()) => debug!("{} session finished", kind.name()),
            Err(SyncError::Cancelled) => info!("{} session cancelled", kind.name()),
            Err(e) => self.report_failure(e.messages()),
        }
        self.finish();
    }

    pub(crate) fn report_failure(&self, errors: Vec<String>) {
        warn!(
            "Sync session for project {} failed: {}",
            self.request.project_id,
            errors.first().map(String::as_str).unwrap_or("unknown error")
        );
        self.send(SyncEvent::Phase(SyncPhase::Failed));
        self.send(SyncEvent::SyncFailed(errors));
    }

    pub(crate) fn finish(&self) {
        self.send(SyncEvent::Finished {
            session: self.session,
        });
    }

    fn send(&self, event: SyncEvent) {
        // The owner may already be gone; nothing left to report to then
        if self.events.send(event).is_err() {
            debug!("Sync event dropped, owner is gone");
        }
    }

    fn phase(&self, phase: SyncPhase) {
        self.send(SyncEvent::Phase(phase));
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Response, SyncError> {
        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let response = self.transport.request(method, path, body).await?;
        Ok(response)
    }

    fn expect_success(response: Response, what: &str) -> Result<Response, SyncError> {
        if response.is_2xx() {
            return Ok(response);
        }
        warn!(
            "{} failed ({}): {}",
            what,
            response.status,
            response.first_error().unwrap_or("no details")
        );
        Err(SyncError::Network {
            status: response.status,
            errors: response.errors,
        })
    }

    fn project_route(&self) -> String {
        routes::project(&self.request.project_id)
    }

    fn revision_route(&self, revision_id: &str) -> String {
        routes::project_revision(&self.request.project_id, revision_id)
    }

    fn parse_project(&self, body: Value) -> Result<ProjectDto, SyncError> {
        let mut project: ProjectDto =
            serde_json::from_value(body).map_err(VcsError::from)?;
        if project.id.is_empty() {
            project.id = self.request.project_id.clone();
        }
        self.send(SyncEvent::RemoteProject(RemoteProjectInfo {
            id: project.id.clone(),
            title: project.title.clone(),
            head: project.head.clone(),
        }));
        Ok(project)
    }

    /// The remote project, or `None` when the remote doesn't know it
    async fn fetch_project(&self) -> Result<Option<ProjectDto>, SyncError> {
        self.phase(SyncPhase::FetchingProjectHead);
        let response = self.call(Method::Get, &self.project_route(), None).await?;
        if response.is(404) {
            return Ok(None);
        }
        let response = Self::expect_success(response, "Fetching project heads")?;
        self.parse_project(response.body).map(Some)
    }

    async fn create_project(&self) -> Result<(), SyncError> {
        self.phase(SyncPhase::CreatingProject);
        // the head pointer goes up only after every revision is pushed
        let payload = json!({ "title": self.request.project_title });
        let response = self
            .call(Method::Put, &self.project_route(), Some(payload))
            .await?;
        let response = Self::expect_success(response, "Creating the project")?;
        info!("Created project {} on remote", self.request.project_id);
        if response.body.is_object() {
            self.parse_project(response.body)?;
        }
        Ok(())
    }

    async fn pull_revision(&self, id: &str) -> Result<(), SyncError> {
        let response = self.call(Method::Get, &self.revision_route(id), None).await?;
        let response = Self::expect_success(response, "Fetching revision data")?;
        let full: RevisionDto = serde_json::from_value(response.body).map_err(VcsError::from)?;
        let data = full.data.ok_or_else(|| {
            VcsError::Serialization(format!("Remote revision {} has no data", id))
        })?;
        debug!("Pulled revision {}", id);
        self.send(SyncEvent::RevisionPulled {
            id: id.to_string(),
            data,
        });
        Ok(())
    }

    async fn push_revision(&self, revision: &Revision) -> Result<(), SyncError> {
        let payload = json!({
            "id": revision.id(),
            "message": revision.message(),
            "timestamp": revision.timestamp().to_string(),
            "parentId": revision.parent_id(),
            "data": revision.serialize_deltas()?,
        });
        let response = self
            .call(Method::Put, &self.revision_route(revision.id()), Some(payload))
            .await?;
        Self::expect_success(response, "Pushing revision data")?;
        debug!("Pushed revision {}", revision.id());
        self.send(SyncEvent::RevisionPushed {
            id: revision.id().to_string(),
        });
        Ok(())
    }

    async fn update_head_pointer(&self) -> Result<(), SyncError> {
        self.phase(SyncPhase::UpdatingHeadPointer);
        let payload = json!({
            "title": self.request.project_title,
            "head": self.request.head_id,
        });
        let response = self
            .call(Method::Put, &self.project_route(), Some(payload))
            .await?;
        Self::expect_success(response, "Updating the project head")?;
        Ok(())
    }

    async fn sync(
        &self,
        fetch_only: bool,
        ids_to_pull: &[String],
        ids_to_push: &[String],
    ) -> Result<(), SyncError> {
        let remote = match self.fetch_project().await? {
            Some(project) => project,
            None if fetch_only => {
                debug!("Project {} is not on remote yet", self.request.project_id);
                ProjectDto::default()
            }
            None => {
                self.create_project().await?;
                ProjectDto::default()
            }
        };

        self.send(SyncEvent::RemoteRevisions(remote.revisions.clone()));

        let root = &self.request.root;
        let diff = reconcile(root, &remote.revisions);
        self.phase(SyncPhase::ReconcileDone);
        debug!(
            "{} new remote revision(s), {} new local revision(s)",
            diff.new_on_remote.len(),
            diff.new_locally.len()
        );

        // shallow copies grafted by an earlier fetch still wait for their data
        let remote_ids: HashSet<&str> = remote.revisions.iter().map(|r| r.id.as_str()).collect();
        let pending_shallow: Vec<String> = if fetch_only {
            Vec::new()
        } else {
            root.iter()
                .filter(|r| r.is_shallow_copy() && remote_ids.contains(r.id()))
                .map(|r| r.id().to_string())
                .collect()
        };

        if diff.is_up_to_date() && pending_shallow.is_empty() {
            if fetch_only {
                self.phase(SyncPhase::Done);
                self.send(SyncEvent::FetchDone);
                return Ok(());
            }
            // a pointer update that failed last time is the only thing left to do
            let head_outdated = remote.head.as_deref() != Some(self.request.head_id.as_str());
            if head_outdated {
                self.update_head_pointer().await?;
            }
            self.phase(SyncPhase::Done);
            self.send(SyncEvent::SyncDone {
                nothing_to_sync: !head_outdated,
            });
            return Ok(());
        }

        let local_index = build_local_index(root);
        let mut mountable = Vec::new();
        let mut unmountable: HashSet<String> = HashSet::new();
        for branch in construct_remote_branches(&diff.new_on_remote)? {
            match branch.mount_id.as_deref() {
                Some(mount) if local_index.contains_key(mount) => mountable.push(branch),
                mount => {
                    warn!(
                        "Structural inconsistency: remote subtree {} hangs from {:?}, which is not known locally",
                        branch.root.id(),
                        mount
                    );
                    unmountable.extend(branch.root.iter().map(|r| r.id().to_string()));
                }
            }
        }
        if !mountable.is_empty() {
            self.send(SyncEvent::SubtreesFetched(mountable));
        }
        self.send(SyncEvent::FetchDone);

        if fetch_only {
            self.phase(SyncPhase::Done);
            return Ok(());
        }

        self.phase(SyncPhase::PullingRevisions);
        let to_pull = pending_shallow
            .iter()
            .chain(diff.new_on_remote.iter().map(|dto| &dto.id))
            .filter(|id| !unmountable.contains(*id))
            .filter(|id| ids_to_pull.is_empty() || ids_to_pull.contains(*id));
        for id in to_pull {
            self.pull_revision(id).await?;
        }

        // parents first, so every pushed revision already has its parent on the remote
        self.phase(SyncPhase::PushingRevisions);
        let mut pushed: HashSet<&str> = HashSet::new();
        let mut skipped: HashSet<&str> = HashSet::new();
        for revision in push_order(root, &diff.new_locally, ids_to_push) {
            let orphaned = revision.parent_id().is_some_and(|p| skipped.contains(p));
            if revision.is_shallow_copy() || orphaned {
                // no deltas to send, and the remote no longer has them either
                warn!(
                    "Not pushing revision {}: its data is not available locally",
                    revision.id()
                );
                skipped.insert(revision.id());
                continue;
            }
            self.push_revision(revision).await?;
            pushed.insert(revision.id());
        }

        let head_id = self.request.head_id.as_str();
        if remote_ids.contains(head_id) || pushed.contains(head_id) {
            self.update_head_pointer().await?;
        } else {
            debug!("Head {} is not on remote, leaving the remote head as is", head_id);
        }

        self.phase(SyncPhase::Done);
        self.send(SyncEvent::SyncDone {
            nothing_to_sync: false,
        });
        Ok(())
    }

    async fn clone_project(&self) -> Result<(), SyncError> {
        self.phase(SyncPhase::FetchingProjectHead);
        let response = self.call(Method::Get, &self.project_route(), None).await?;
        let response = Self::expect_success(response, "Fetching the project to clone")?;
        let project = self.parse_project(response.body)?;

        self.send(SyncEvent::RemoteRevisions(project.revisions.clone()));
        let tree = construct_remote_tree(&project.revisions)?;
        self.phase(SyncPhase::ReconcileDone);
        self.send(SyncEvent::HistoryReplaced(tree));

        self.phase(SyncPhase::PullingRevisions);
        for dto in &project.revisions {
            self.pull_revision(&dto.id).await?;
        }

        self.phase(SyncPhase::Done);
        self.send(SyncEvent::CloneDone { head: project.head });
        Ok(())
    }

    async fn delete_project(&self) -> Result<(), SyncError> {
        self.phase(SyncPhase::DeletingProject);
        let response = self.call(Method::Delete, &self.project_route(), None).await?;
        if response.is(404) {
            debug!("Project {} is already gone", self.request.project_id);
        } else {
            Self::expect_success(response, "Deleting the project")?;
        }
        self.phase(SyncPhase::Done);
        self.send(SyncEvent::DeleteDone);
        Ok(())
    }
}
