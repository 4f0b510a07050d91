//! In-memory remote project store and helpers shared by the sync tests.

#![allow(dead_code)]

use async_trait::async_trait;
use helio_vcs_core::{InMemoryProject, Revision, RevisionItem, VersionControl, category};
use helio_vcs_sync::{Method, RemoteProjectInfo, Response, SyncListener, Transport, TransportError};
use serde_json::{Map, Value, json};
use std::sync::Mutex;
use std::time::Duration;

pub const PROJECT_ID: &str = "project-1";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
struct StoredRevision {
    id: String,
    parent_id: Option<String>,
    timestamp: Value,
    message: String,
    data: Value,
}

#[derive(Debug, Clone, Default)]
struct StoredProject {
    title: String,
    head: Option<String>,
    revisions: Vec<StoredRevision>,
}

#[derive(Debug, Clone)]
struct Failure {
    method: Method,
    path: String,
    status: u16,
    body: Value,
}

#[derive(Default)]
struct RemoteState {
    project: Option<StoredProject>,
    requests: Vec<RecordedRequest>,
    failures: Vec<Failure>,
}

/// A remote holding at most one project, which refuses revisions whose parent it doesn't know
#[derive(Default)]
pub struct MockRemote {
    state: Mutex<RemoteState>,
    delay: Duration,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote answering every request after `delay`
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Answer `method path` with `status` and `body` instead of handling it
    pub fn fail(&self, method: Method, path: &str, status: u16, body: Value) {
        self.state.lock().unwrap().failures.push(Failure {
            method,
            path: path.to_string(),
            status,
            body,
        });
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Recorded requests, forgetting them
    pub fn take_requests(&self) -> Vec<RecordedRequest> {
        std::mem::take(&mut self.state.lock().unwrap().requests)
    }

    pub fn has_project(&self) -> bool {
        self.state.lock().unwrap().project.is_some()
    }

    pub fn head(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .project
            .as_ref()
            .and_then(|p| p.head.clone())
    }

    pub fn title(&self) -> Option<String> {
        self.state.lock().unwrap().project.as_ref().map(|p| p.title.clone())
    }

    pub fn revision_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .project
            .as_ref()
            .map(|p| p.revisions.iter().map(|r| r.id.clone()).collect())
            .unwrap_or_default()
    }

    fn handle(&self, method: Method, path: &str, body: Option<Value>) -> Response {
        let mut state = self.state.lock().unwrap();
        state.requests.push(RecordedRequest {
            method,
            path: path.to_string(),
            body: body.clone(),
        });

        if let Some(failure) = state
            .failures
            .iter()
            .find(|f| f.method == method && f.path == path)
        {
            return Response::new(failure.status, failure.body.clone());
        }

        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        match (method, segments.as_slice()) {
            (Method::Get, ["projects", id]) => match &state.project {
                Some(project) => Response::new(200, project_json(id, project)),
                None => not_found("Project not found"),
            },
            (Method::Put, ["projects", id]) => {
                let body = body.unwrap_or(Value::Null);
                let project = state.project.get_or_insert_with(StoredProject::default);
                if let Some(title) = body.get("title").and_then(Value::as_str) {
                    project.title = title.to_string();
                }
                if let Some(head) = body.get("head").and_then(Value::as_str) {
                    project.head = Some(head.to_string());
                }
                Response::new(200, project_json(id, project))
            }
            (Method::Delete, ["projects", _]) => match state.project.take() {
                Some(_) => Response::new(200, Value::Null),
                None => not_found("Project not found"),
            },
            (Method::Get, ["projects", _, "revisions", revision_id]) => {
                let found = state
                    .project
                    .as_ref()
                    .and_then(|p| p.revisions.iter().find(|r| r.id == *revision_id));
                match found {
                    Some(revision) => Response::new(200, revision_json(revision, true)),
                    None => not_found("Revision not found"),
                }
            }
            (Method::Put, ["projects", _, "revisions", revision_id]) => {
                let Some(project) = state.project.as_mut() else {
                    return not_found("Project not found");
                };
                let body = body.unwrap_or(Value::Null);
                let parent_id = body
                    .get("parentId")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if let Some(parent) = &parent_id {
                    if !project.revisions.iter().any(|r| &r.id == parent) {
                        return Response::new(422, json!({ "parentId": "unknown parent revision" }));
                    }
                }
                project.revisions.push(StoredRevision {
                    id: revision_id.to_string(),
                    parent_id,
                    timestamp: body.get("timestamp").cloned().unwrap_or(Value::Null),
                    message: body
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    data: body.get("data").cloned().unwrap_or(Value::Null),
                });
                Response::new(200, Value::Null)
            }
            _ => Response::new(405, json!({ "message": "Method not allowed" })),
        }
    }
}

#[async_trait]
impl Transport for MockRemote {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Response, TransportError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.handle(method, path, body))
    }
}

fn not_found(message: &str) -> Response {
    Response::new(404, json!({ "status": "Not Found", "message": message }))
}

fn project_json(id: &str, project: &StoredProject) -> Value {
    let revisions: Vec<Value> = project
        .revisions
        .iter()
        .map(|r| revision_json(r, false))
        .collect();
    json!({
        "id": id,
        "title": project.title,
        "head": project.head,
        "revisions": revisions,
    })
}

fn revision_json(revision: &StoredRevision, with_data: bool) -> Value {
    let mut map = Map::new();
    map.insert("id".into(), json!(revision.id));
    map.insert("parentId".into(), json!(revision.parent_id));
    map.insert("timestamp".into(), revision.timestamp.clone());
    map.insert("message".into(), json!(revision.message));
    if with_data {
        map.insert("data".into(), revision.data.clone());
    }
    Value::Object(map)
}

/// Listener keeping a log of every callback
#[derive(Default)]
pub struct RecordingListener {
    pub project_info: Option<RemoteProjectInfo>,
    pub fetch_done: usize,
    pub sync_done: Vec<bool>,
    pub failures: Vec<Vec<String>>,
    pub pulled: Vec<String>,
    pub pushed: Vec<String>,
    pub clone_done: usize,
    pub delete_done: usize,
}

impl SyncListener for RecordingListener {
    fn on_project_info(&mut self, project: &RemoteProjectInfo) {
        self.project_info = Some(project.clone());
    }

    fn on_fetch_done(&mut self) {
        self.fetch_done += 1;
    }

    fn on_sync_done(&mut self, nothing_to_sync: bool) {
        self.sync_done.push(nothing_to_sync);
    }

    fn on_sync_failed(&mut self, errors: &[String]) {
        self.failures.push(errors.to_vec());
    }

    fn on_revision_pulled(&mut self, revision: &Revision) {
        self.pulled.push(revision.id().to_string());
    }

    fn on_revision_pushed(&mut self, revision: &Revision) {
        self.pushed.push(revision.id().to_string());
    }

    fn on_clone_done(&mut self) {
        self.clone_done += 1;
    }

    fn on_delete_done(&mut self) {
        self.delete_done += 1;
    }
}

/// One client's local side: live items plus their history
pub struct LocalProject {
    pub items: InMemoryProject,
    pub vcs: VersionControl,
}

impl LocalProject {
    pub fn new() -> Self {
        Self {
            items: InMemoryProject::new(),
            vcs: VersionControl::new(),
        }
    }

    pub fn set_track(&mut self, id: &str, notes: &[u8]) {
        self.items.upsert(RevisionItem::new(
            id,
            category::PIANO_TRACK,
            id,
            json!({ "notes": notes }),
        ));
    }

    pub fn commit(&mut self, message: &str) -> String {
        self.vcs.commit_all(&self.items, message).unwrap()
    }
}

pub fn revision_puts(requests: &[RecordedRequest]) -> Vec<String> {
    requests
        .iter()
        .filter(|r| r.method == Method::Put && r.path.contains("/revisions/"))
        .filter_map(|r| r.path.rsplit('/').next().map(str::to_string))
        .collect()
}

pub fn head_puts(requests: &[RecordedRequest]) -> Vec<String> {
    requests
        .iter()
        .filter(|r| r.method == Method::Put && !r.path.contains("/revisions/"))
        .filter_map(|r| r.body.as_ref()?.get("head")?.as_str().map(str::to_string))
        .collect()
}

pub fn writes(requests: &[RecordedRequest]) -> usize {
    requests.iter().filter(|r| r.method != Method::Get).count()
}
