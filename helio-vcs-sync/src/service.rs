//! Owner-side handle of the sync worker.
//!
//! `SyncService` starts at most one session at a time on a dedicated
//! `sync` thread and drains the worker's events on the owner thread, where
//! they are applied to the [`VersionControl`] and forwarded to a
//! [`SyncListener`].

use crate::error::SyncError;
use crate::events::{RemoteProjectInfo, SyncEvent, SyncListener, SyncPhase};
use crate::session::SessionContext;
use crate::transport::{HttpTransport, Transport};
use crate::worker::{SessionKind, SessionRequest, SyncWorker};
use helio_vcs_core::{Revision, TrackedItemsSource, VersionControl};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

const WAIT_INTERVAL: Duration = Duration::from_millis(5);

pub struct SyncService {
    transport: Arc<dyn Transport>,
    stop_timeout: Duration,
    events_tx: UnboundedSender<SyncEvent>,
    events_rx: UnboundedReceiver<SyncEvent>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    session: u64,
    phase: SyncPhase,
    remote_project: Option<RemoteProjectInfo>,
}

impl SyncService {
    /// Service talking HTTP to the remote described by `context`
    pub fn new(context: &SessionContext) -> Result<Self, SyncError> {
        let transport = HttpTransport::new(context)?;
        Ok(Self::with_transport(Arc::new(transport), context.stop_timeout))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, stop_timeout: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            stop_timeout,
            events_tx,
            events_rx,
            cancel: Arc::new(AtomicBool::new(false)),
            worker: None,
            session: 0,
            phase: SyncPhase::Idle,
            remote_project: None,
        }
    }

    /// Whether a session thread is still running
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Remote project metadata from the last session that reached the remote
    pub fn remote_project(&self) -> Option<&RemoteProjectInfo> {
        self.remote_project.as_ref()
    }

    /// Graft new remote revisions as shallow copies, without pushing anything
    pub fn do_fetch(&mut self, vcs: &VersionControl, project_id: &str, title: &str) -> bool {
        self.start(Self::snapshot(vcs, SessionKind::Fetch, project_id, title))
    }

    /// Pull and push everything new, or only the given ids when a list is non-empty
    pub fn do_sync(
        &mut self,
        vcs: &VersionControl,
        project_id: &str,
        title: &str,
        ids_to_pull: Vec<String>,
        ids_to_push: Vec<String>,
    ) -> bool {
        let kind = SessionKind::Sync {
            ids_to_pull,
            ids_to_push,
        };
        self.start(Self::snapshot(vcs, kind, project_id, title))
    }

    /// Replace the local history with the remote one once the session completes
    pub fn do_clone(&mut self, project_id: &str) -> bool {
        let root = Revision::with_id("", "", 0);
        self.start(SessionRequest {
            kind: SessionKind::Clone,
            project_id: project_id.to_string(),
            project_title: String::new(),
            root,
            head_id: String::new(),
        })
    }

    pub fn do_delete(&mut self, project_id: &str) -> bool {
        self.start(SessionRequest {
            kind: SessionKind::Delete,
            project_id: project_id.to_string(),
            project_title: String::new(),
            root: Revision::with_id("", "", 0),
            head_id: String::new(),
        })
    }

    fn snapshot(vcs: &VersionControl, kind: SessionKind, project_id: &str, title: &str) -> SessionRequest {
        SessionRequest {
            kind,
            project_id: project_id.to_string(),
            project_title: title.to_string(),
            root: vcs.root().clone(),
            head_id: vcs.head_id().to_string(),
        }
    }

    fn start(&mut self, request: SessionRequest) -> bool {
        if self.is_running() {
            warn!(
                "Failed to start {} session, another session is already running",
                request.kind.name()
            );
            return false;
        }
        self.join_finished_worker();

        self.cancel = Arc::new(AtomicBool::new(false));
        self.phase = SyncPhase::Idle;
        self.session += 1;
        let worker = SyncWorker::new(
            self.session,
            self.transport.clone(),
            self.events_tx.clone(),
            self.cancel.clone(),
            request,
        );

        let spawned = thread::Builder::new()
            .name("sync".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        worker.report_failure(vec![format!("Failed to start sync runtime: {}", e)]);
                        worker.finish();
                        return;
                    }
                };
                runtime.block_on(worker.run());
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                true
            }
            Err(e) => {
                error!("Failed to spawn sync thread: {}", e);
                false
            }
        }
    }

    fn join_finished_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("Sync thread panicked");
            }
        }
    }

    /// Ask the running session to stop before its next network call
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Apply every event received so far without blocking.
    /// Returns the number of events handled.
    pub fn poll(
        &mut self,
        vcs: &mut VersionControl,
        source: &mut dyn TrackedItemsSource,
        listener: &mut dyn SyncListener,
    ) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle(event, vcs, source, listener);
            handled += 1;
        }
        handled
    }

    /// Block until the running session finishes, applying its events as they arrive.
    pub fn wait(
        &mut self,
        vcs: &mut VersionControl,
        source: &mut dyn TrackedItemsSource,
        listener: &mut dyn SyncListener,
    ) {
        loop {
            match self.events_rx.try_recv() {
                Ok(event) => {
                    let finished =
                        matches!(event, SyncEvent::Finished { session } if session == self.session);
                    self.handle(event, vcs, source, listener);
                    if finished {
                        return;
                    }
                }
                Err(TryRecvError::Empty) => {
                    let Some(handle) = self.worker.as_ref() else {
                        return;
                    };
                    if handle.is_finished() {
                        // everything the thread sent is queued by now
                        self.poll(vcs, source, listener);
                        if self.worker.is_some() {
                            self.abandon_dead_worker(listener);
                        }
                        return;
                    }
                    thread::sleep(WAIT_INTERVAL);
                }
                Err(TryRecvError::Disconnected) => return,
            }
        }
    }

    /// The sync thread exited without reporting the end of its session
    fn abandon_dead_worker(&mut self, listener: &mut dyn SyncListener) {
        error!("Sync thread exited before finishing its session");
        self.join_finished_worker();
        self.phase = SyncPhase::Failed;
        listener.on_sync_failed(&["Sync session ended unexpectedly".to_string()]);
    }

    fn handle(
        &mut self,
        event: SyncEvent,
        vcs: &mut VersionControl,
        source: &mut dyn TrackedItemsSource,
        listener: &mut dyn SyncListener,
    ) {
        match event {
            SyncEvent::Phase(phase) => {
                debug!("Sync phase: {}", phase.as_str());
                self.phase = phase;
            }
            SyncEvent::RemoteProject(info) => {
                listener.on_project_info(&info);
                self.remote_project = Some(info);
            }
            SyncEvent::RemoteRevisions(revisions) => {
                vcs.update_remote_sync_cache(&revisions);
            }
            SyncEvent::SubtreesFetched(branches) => {
                for branch in branches {
                    if let Some(mount) = branch.mount_id.as_deref() {
                        vcs.append_subtree(branch.root, mount);
                    }
                }
            }
            SyncEvent::FetchDone => listener.on_fetch_done(),
            SyncEvent::RevisionPulled { id, data } => {
                match vcs.update_shallow_revision_data(&id, &data) {
                    Ok(revision) => listener.on_revision_pulled(revision),
                    Err(e) => warn!("Failed to apply pulled revision {}: {}", id, e),
                }
                vcs.mark_diff_outdated();
            }
            SyncEvent::RevisionPushed { id } => match vcs.update_local_sync_cache(&id) {
                Ok(()) => {
                    if let Some(revision) = vcs.find_revision(&id) {
                        listener.on_revision_pushed(revision);
                    }
                }
                Err(e) => warn!("Pushed revision {} is gone locally: {}", id, e),
            },
            SyncEvent::HistoryReplaced(root) => vcs.replace_history(root),
            SyncEvent::CloneDone { head } => {
                let target = head
                    .filter(|id| vcs.find_revision(id).is_some())
                    .unwrap_or_else(|| vcs.root().id().to_string());
                match vcs.checkout(source, &target) {
                    Ok(()) => {
                        info!("Cloned history checked out at {}", target);
                        listener.on_clone_done();
                    }
                    Err(e) => {
                        warn!("Failed to check out cloned revision {}: {}", target, e);
                        self.phase = SyncPhase::Failed;
                        listener.on_sync_failed(&[e.to_string()]);
                    }
                }
            }
            SyncEvent::DeleteDone => listener.on_delete_done(),
            SyncEvent::SyncDone { nothing_to_sync } => listener.on_sync_done(nothing_to_sync),
            SyncEvent::SyncFailed(errors) => listener.on_sync_failed(&errors),
            SyncEvent::Finished { session } => {
                // the thread exits right after its last event
                if session == self.session {
                    self.join_finished_worker();
                }
            }
        }
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        self.cancel();
        let deadline = Instant::now() + self.stop_timeout;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            if handle.join().is_err() {
                error!("Sync thread panicked");
            }
        } else {
            warn!(
                "Sync thread did not stop within {}ms, detaching it",
                self.stop_timeout.as_millis()
            );
        }
    }
}
