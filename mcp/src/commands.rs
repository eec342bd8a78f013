//! The command surface: create, update, inspect, select and delete projects.
//!
//! Every mutation follows the same path: write through the document store,
//! bump the state version, publish the marker for sibling processes, then
//! broadcast to local subscribers. Failures never escape a command; they come
//! back as a [`CommandResult`] with `status: "error"`.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dev_server::DevServer;
use crate::document::{Category, Document, DocumentKey};
use crate::edit::{apply_edit, EditKind, StructuralEdit};
use crate::error::{Result, SyncError};
use crate::events::{EventKind, ItemChange, ProjectPayload, ServerEvent};
use crate::hub::{SubscriberHub, SubscriberId};
use crate::marker::{MarkerFile, SyncCursor};
use crate::merge::{self, Strategy};
use crate::state::{Loaded, ProjectState, StateStore};
use crate::store::{validate_project_name, DocumentStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Success,
    Error,
    PartialSuccess,
    NoProject,
}

/// Structured outcome of one command, serialized as the tool result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl CommandResult {
    fn new(status: CommandStatus) -> Self {
        Self {
            status,
            message: None,
            error: None,
            error_kind: None,
            data: Map::new(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(CommandStatus::Success).message(message)
    }

    pub fn partial(message: impl Into<String>) -> Self {
        Self::new(CommandStatus::PartialSuccess).message(message)
    }

    pub fn no_project(message: impl Into<String>) -> Self {
        Self::new(CommandStatus::NoProject).message(message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        let mut result = Self::new(CommandStatus::Error);
        result.error = Some(message.into());
        result
    }

    pub fn from_error(e: &SyncError) -> Self {
        let mut result = Self::error(e.to_string());
        result.error_kind = Some(e.kind());
        result
    }

    fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attaches one extra field to the result.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == CommandStatus::Error
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

fn settle(result: Result<CommandResult>) -> CommandResult {
    result.unwrap_or_else(|e| CommandResult::from_error(&e))
}

fn delete_outcome(project: &str, directory_removed: bool, registry_removed: bool, errors: &[String]) -> CommandResult {
    match (directory_removed, registry_removed) {
        (true, true) => CommandResult::success(format!("Project '{project}' deleted")),
        (true, false) => CommandResult::partial(format!(
            "Project '{project}' directory removed, but the registry entry could not be removed"
        )),
        (false, true) => CommandResult::partial(format!(
            "Project '{project}' removed from registry, but its directory could not be removed"
        )),
        (false, false) => CommandResult::from_error(&SyncError::PartialFailure(format!(
            "could not delete project '{project}': {}",
            errors.join("; ")
        ))),
    }
}

/// One process's view of the project working set and everything that keeps it
/// in sync: disk, in-memory state, the shared marker, and local subscribers.
pub struct ProjectService {
    store: DocumentStore,
    state: StateStore,
    hub: SubscriberHub,
    marker: MarkerFile,
    cursor: SyncCursor,
    dev_server: Arc<dyn DevServer>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for ProjectService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectService")
            .field("root", &self.store.root())
            .field("version", &self.state.version())
            .field("subscribers", &self.hub.len())
            .finish()
    }
}

impl ProjectService {
    pub fn new(config: &Config, dev_server: Arc<dyn DevServer>) -> Self {
        Self {
            store: DocumentStore::new(&config.data_dir),
            state: StateStore::new(),
            hub: SubscriberHub::new(),
            marker: MarkerFile::in_dir(&config.data_dir),
            cursor: SyncCursor::new(),
            dev_server,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn hub(&self) -> &SubscriberHub {
        &self.hub
    }

    pub fn marker(&self) -> &MarkerFile {
        &self.marker
    }

    pub fn cursor(&self) -> &SyncCursor {
        &self.cursor
    }

    /// Cancelled by `shutdown`; every background task hangs off it.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn create_project(&self, project: &str) -> CommandResult {
        info!(project, "create_project");
        settle(self.try_create_project(project))
    }

    fn try_create_project(&self, project: &str) -> Result<CommandResult> {
        let documents = self.store.create(project, Utc::now())?;
        let loaded = self.state.load(project, documents, "create_project");
        self.publish_marker(project);
        self.broadcast_loaded(&loaded, "create_project");

        let files: Vec<String> = DocumentKey::ALL.into_iter().map(DocumentKey::file_name).collect();
        Ok(CommandResult::success(format!("Project '{project}' initialized successfully"))
            .with("project_name", project)
            .with("files_created", files)
            .with("project_path", self.store.project_dir(project).display().to_string())
            .with("version", loaded.state.version)
            .with("dev_server", self.dev_server.status()))
    }

    /// Applies `payload` to one document of `project` under `strategy`
    /// (`merge` when absent). Updating a project other than the active one
    /// makes it active.
    pub fn update_document(&self, project: &str, document: &str, payload: Value, strategy: Option<&str>) -> CommandResult {
        info!(project, document, strategy = strategy.unwrap_or("merge"), "update_document");
        settle(self.try_update_document(project, document, payload, strategy))
    }

    fn try_update_document(
        &self,
        project: &str,
        document: &str,
        payload: Value,
        strategy: Option<&str>,
    ) -> Result<CommandResult> {
        validate_project_name(project)?;
        let key: DocumentKey = document.parse()?;
        let strategy = strategy.map(str::parse::<Strategy>).transpose()?.unwrap_or_default();
        let update = Document::from_payload(key.category(), payload)?;

        let current = self.store.read(project, key)?;
        let merged = merge::apply(&current, update, strategy)?;
        self.store.write(project, key, &merged, Utc::now())?;

        let state = if self.state.snapshot().is_active(project) {
            let state = self.state.update(key, merged.clone(), "update_document")?;
            self.publish_marker(project);
            self.broadcast_documents(&state, Some(key), "update_document");
            state
        } else {
            let documents = self.store.read_all(project)?;
            let loaded = self.state.load(project, documents, "update_document");
            self.publish_marker(project);
            self.broadcast_loaded(&loaded, "update_document");
            loaded.state
        };

        Ok(CommandResult::success(format!(
            "Updated {} in project '{project}' using {strategy} strategy",
            key.file_name()
        ))
        .with("project_name", project)
        .with("document", key)
        .with("strategy", strategy)
        .with("version", state.version)
        .with("content", merged.to_value()))
    }

    pub fn get_active_project(&self) -> CommandResult {
        let state = self.state.snapshot();
        let Some(project) = state.project_name.as_deref() else {
            return CommandResult::no_project("No project is currently loaded");
        };
        CommandResult::success(format!("Project '{project}' is active"))
            .with("project_name", project)
            .with("documents", &state.documents)
            .with("version", state.version)
            .with("last_command", &state.last_command)
            .with("last_updated", state.last_updated)
    }

    pub fn list_projects(&self) -> CommandResult {
        settle(self.store.list().map(|mut projects| {
            projects.sort_by(|a, b| a.project_name.cmp(&b.project_name));
            CommandResult::success(format!("Found {} project(s)", projects.len()))
                .with("count", projects.len())
                .with("projects", projects)
        }))
    }

    pub fn select_project(&self, project: &str) -> CommandResult {
        info!(project, "select_project");
        settle(self.try_select_project(project))
    }

    fn try_select_project(&self, project: &str) -> Result<CommandResult> {
        validate_project_name(project)?;
        let documents = self.store.read_all(project)?;
        let loaded = self.state.load(project, documents, "select_project");
        self.publish_marker(project);
        self.broadcast_loaded(&loaded, "select_project");

        Ok(CommandResult::success(format!("Project '{project}' selected"))
            .with("project_name", project)
            .with("previous_project", &loaded.previous_project)
            .with("version", loaded.state.version)
            .with("dev_server", self.dev_server.status()))
    }

    /// Removes a project from disk and the registry.
    ///
    /// Both removals are attempted regardless of each other. When the project
    /// is active here it is cleared and subscribers are told; when the marker
    /// names it, the marker is reset so siblings clear too.
    pub fn delete_project(&self, project: &str) -> CommandResult {
        info!(project, "delete_project");
        settle(self.try_delete_project(project))
    }

    fn try_delete_project(&self, project: &str) -> Result<CommandResult> {
        validate_project_name(project)?;
        if !self.store.is_known(project)? {
            return Err(SyncError::not_found(format!("Project '{project}' does not exist")));
        }

        let active_here = self.state.snapshot().is_active(project);
        let active_in_marker = match self.marker.read() {
            Ok(record) => record.is_some_and(|record| record.project_name == project),
            Err(e) => {
                warn!(error = %e, "could not read marker before delete");
                false
            }
        };

        let report = self.store.delete(project);
        let directory_removed = report.directory_removed();
        let registry_removed = report.registry_removed();
        let errors = report.errors();

        let cleared = active_here && (directory_removed || registry_removed);
        if cleared {
            let state = self.state.clear("delete_project");
            self.publish_marker("");
            let event = ServerEvent::new(
                EventKind::ProjectDeleted {
                    project_name: project.to_string(),
                },
                state.version,
                "delete_project",
            );
            self.hub.broadcast(&event);
        } else if active_in_marker && (directory_removed || registry_removed) {
            self.publish_marker("");
        }

        let result = delete_outcome(project, directory_removed, registry_removed, &errors);
        if !errors.is_empty() {
            warn!(project, ?errors, "delete_project incomplete");
        }
        Ok(result
            .with("project_name", project)
            .with("was_active", active_here || active_in_marker)
            .with("state_cleared", cleared)
            .with("directory_removed", directory_removed)
            .with("registry_removed", registry_removed)
            .with("errors", errors))
    }

    /// Stops background tasks and the subscriber server and disconnects every
    /// subscriber. Safe to call twice.
    pub fn shutdown(&self) -> CommandResult {
        let already_stopped = self.shutdown.is_cancelled();
        self.shutdown.cancel();
        let closed = self.hub.close_all();
        info!(subscribers = closed, already_stopped, "shutdown");
        let message = if already_stopped {
            "Services were already stopped"
        } else {
            "Background tasks and the WebSocket server stopped"
        };
        CommandResult::success(message)
            .with("tasks_cancelled", !already_stopped)
            .with("subscribers_closed", closed)
            .with("dev_server", self.dev_server.status())
    }

    /// Applies a structural edit from `subscriber` to the active project.
    /// Failures go back to that subscriber only.
    pub fn apply_structural_edit(&self, subscriber: SubscriberId, edit: &StructuralEdit) {
        if let Err(e) = self.try_structural_edit(edit) {
            warn!(subscriber, document = %edit.document, error = %e, "structural edit rejected");
            let event = ServerEvent::new(
                EventKind::Error { message: e.to_string() },
                self.state.version(),
                "structural_edit",
            );
            if let Err(e) = self.hub.send_to(subscriber, &event) {
                debug!(error = %e, "could not report edit failure");
            }
        }
    }

    fn try_structural_edit(&self, edit: &StructuralEdit) -> Result<ProjectState> {
        let project = self
            .state
            .active_project()
            .ok_or_else(|| SyncError::not_found("no project is active"))?;
        if edit.document.category() != Category::Structured {
            return Err(SyncError::validation(format!("'{}' is not a structured document", edit.document)));
        }
        let current = self.store.read(&project, edit.document)?;
        let Document::Tree(mut tree) = current.clone() else {
            return Err(SyncError::validation(format!("'{}' is not a structured document", edit.document)));
        };
        let outcome = apply_edit(&mut tree, &edit.path, &edit.action)?;
        let updated = merge::apply(&current, Document::Tree(tree), Strategy::Replace)?;
        self.store.write(&project, edit.document, &updated, Utc::now())?;
        let state = self.state.update(edit.document, updated.clone(), "structural_edit")?;
        self.publish_marker(&project);

        let change = ItemChange {
            project_name: project,
            document: edit.document,
            path: edit.path.clone(),
            item_id: outcome.item_id,
            content: updated.to_value(),
        };
        let kind = match outcome.kind {
            EditKind::Added => EventKind::ItemAdded(change),
            EditKind::Updated => EventKind::ItemUpdated(change),
            EditKind::Deleted => EventKind::ItemDeleted(change),
            EditKind::Renamed => EventKind::ItemRenamed(change),
            EditKind::Duplicated => EventKind::ItemDuplicated(change),
        };
        self.hub.broadcast(&ServerEvent::new(kind, state.version, "structural_edit"));
        Ok(state)
    }

    /// Pushes the current state to one subscriber. With `fallback`, a process
    /// with nothing loaded sends the most recently updated registered project
    /// instead; it is not loaded.
    pub fn send_state(&self, subscriber: SubscriberId, fallback: bool, command: &str) {
        let state = self.state.snapshot();
        let payload = match ProjectPayload::from_state(&state) {
            Some(payload) => Some(payload),
            None if fallback => self.fallback_payload(),
            None => None,
        };
        let Some(project) = payload else {
            debug!(subscriber, "no project to send");
            return;
        };
        let event = ServerEvent::new(EventKind::StateInitialized { project }, state.version, command);
        if let Err(e) = self.hub.send_to(subscriber, &event) {
            debug!(error = %e, "could not send state");
        }
    }

    fn fallback_payload(&self) -> Option<ProjectPayload> {
        let entry = match self.store.most_recent() {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(error = %e, "could not read registry for fallback state");
                return None;
            }
        };
        match self.store.read_all(&entry.project_name) {
            Ok(documents) => Some(ProjectPayload {
                project_name: entry.project_name,
                documents,
            }),
            Err(e) => {
                warn!(project = %entry.project_name, error = %e, "could not load fallback project");
                None
            }
        }
    }

    /// Rewrites the marker. The version is recorded as seen before the file
    /// lands so this process's own watcher never adopts it.
    fn publish_marker(&self, project: &str) {
        let record = self.marker.next_record(project, self.cursor.last_seen(), Utc::now());
        self.cursor.advance(record.version);
        match self.marker.write(&record) {
            Ok(()) => debug!(project, version = record.version, "marker published"),
            Err(e) => warn!(project, version = record.version, error = %e, "failed to publish marker"),
        }
    }

    pub(crate) fn broadcast_loaded(&self, loaded: &Loaded, command: &str) {
        let Some(project) = ProjectPayload::from_state(&loaded.state) else {
            return;
        };
        let kind = if loaded.switched() {
            EventKind::StateSwitched {
                previous_project: loaded.previous_project.clone(),
                project,
            }
        } else {
            EventKind::StateInitialized { project }
        };
        self.hub.broadcast(&ServerEvent::new(kind, loaded.state.version, command));
    }

    pub(crate) fn broadcast_documents(&self, state: &ProjectState, updated: Option<DocumentKey>, command: &str) {
        let Some(project) = ProjectPayload::from_state(state) else {
            return;
        };
        let event = ServerEvent::new(
            EventKind::DocumentsUpdated {
                project,
                updated_document: updated,
            },
            state.version,
            command,
        );
        self.hub.broadcast(&event);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;

    use super::*;
    use crate::dev_server::{DevServerState, DevServerStatus};
    use crate::edit::EditAction;
    use crate::hub::tests::RecordingSink;

    pub(crate) struct Offline;

    impl DevServer for Offline {
        fn status(&self) -> DevServerStatus {
            DevServerStatus {
                state: DevServerState::NotRunning,
                url: "http://localhost:3000".into(),
            }
        }
    }

    pub(crate) fn service(dir: &std::path::Path) -> ProjectService {
        ProjectService::new(&Config::with_data_dir(dir), Arc::new(Offline))
    }

    #[test]
    fn create_loads_project_and_publishes_marker() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let sink = Arc::new(RecordingSink::default());
        service.hub().register(sink.clone());

        let result = service.create_project("demo1");
        assert_eq!(result.status, CommandStatus::Success);
        assert_eq!(result.get("version"), Some(&json!(1)));
        assert_eq!(service.state().active_project().as_deref(), Some("demo1"));

        let marker = service.marker().read().unwrap().unwrap();
        assert_eq!(marker.project_name, "demo1");
        assert_eq!(service.cursor().last_seen(), marker.version);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "state_initialized");
        assert_eq!(events[0]["project"]["project_name"], "demo1");
    }

    #[test]
    fn creating_second_project_switches() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        service.create_project("alpha");
        let sink = Arc::new(RecordingSink::default());
        service.hub().register(sink.clone());
        service.create_project("beta");
        let events = sink.events();
        assert_eq!(events[0]["type"], "state_switched");
        assert_eq!(events[0]["previous_project"], "alpha");
    }

    #[test]
    fn invalid_and_duplicate_names_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let result = service.create_project("no spaces");
        assert!(result.is_error());
        assert_eq!(result.error_kind, Some("validation"));
        service.create_project("demo");
        let result = service.create_project("demo");
        assert!(result.is_error());
        assert_eq!(service.state().version(), 1);
    }

    #[test]
    fn update_merges_and_broadcasts() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        service.create_project("demo");
        let sink = Arc::new(RecordingSink::default());
        service.hub().register(sink.clone());

        let result = service.update_document("demo", "requirement.js", json!("{\"features\": [\"login\"]}"), None);
        assert_eq!(result.status, CommandStatus::Success);
        assert_eq!(result.get("strategy"), Some(&json!("merge")));
        assert_eq!(result.get("content").unwrap()["features"], json!(["login"]));

        let events = sink.events();
        assert_eq!(events[0]["type"], "documents_updated");
        assert_eq!(events[0]["updated_document"], "requirement");
        assert_eq!(events[0]["version"], 2);
    }

    #[test]
    fn update_rejects_bad_strategy_and_payload() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        service.create_project("demo");
        let result = service.update_document("demo", "ddd", json!({}), Some("overwrite"));
        assert_eq!(result.error_kind, Some("validation"));
        let result = service.update_document("demo", "summary", json!({"a": 1}), None);
        assert_eq!(result.error_kind, Some("validation"));
        let result = service.update_document("demo", "nonsense", json!({}), None);
        assert_eq!(result.error_kind, Some("validation"));
        assert_eq!(service.state().version(), 1);
    }

    #[test]
    fn updating_inactive_project_activates_it() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        service.create_project("alpha");
        service.create_project("beta");
        let sink = Arc::new(RecordingSink::default());
        service.hub().register(sink.clone());
        let result = service.update_document("alpha", "summary", json!("# Alpha"), Some("append"));
        assert_eq!(result.status, CommandStatus::Success);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "state_switched");
        assert_eq!(events[0]["previous_project"], "beta");
        let state = service.state().snapshot();
        assert_eq!(state.project_name.as_deref(), Some("alpha"));
        assert_eq!(state.version, 3);
        assert_eq!(state.documents[&DocumentKey::Summary], Document::Text("# Alpha".into()));
    }

    #[test]
    fn get_active_reports_no_project_then_state() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        assert_eq!(service.get_active_project().status, CommandStatus::NoProject);
        service.create_project("demo");
        let result = service.get_active_project();
        assert_eq!(result.status, CommandStatus::Success);
        assert_eq!(result.get("last_command"), Some(&json!("create_project")));
        assert!(result.get("documents").unwrap()["frontend_data"]["pages"].is_array());
    }

    #[test]
    fn list_is_sorted_with_count() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        service.create_project("zeta");
        service.create_project("alpha");
        let result = service.list_projects();
        assert_eq!(result.get("count"), Some(&json!(2)));
        assert_eq!(result.get("projects").unwrap()[0]["project_name"], "alpha");
    }

    #[test]
    fn delete_active_clears_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        service.create_project("demo");
        let sink = Arc::new(RecordingSink::default());
        service.hub().register(sink.clone());

        let result = service.delete_project("demo");
        assert_eq!(result.status, CommandStatus::Success);
        assert_eq!(result.get("state_cleared"), Some(&json!(true)));
        let state = service.state().snapshot();
        assert_eq!(state.project_name, None);
        assert_eq!(state.version, 2);
        assert_eq!(service.marker().read().unwrap().unwrap().project_name, "");
        assert_eq!(sink.events()[0]["type"], "project_deleted");
    }

    #[test]
    fn delete_other_project_leaves_state_alone() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        service.create_project("keep");
        service.create_project("drop");
        service.select_project("keep");
        let before = service.state().snapshot();

        let result = service.delete_project("drop");
        assert_eq!(result.status, CommandStatus::Success);
        assert_eq!(service.state().snapshot(), before);
        assert_eq!(service.marker().read().unwrap().unwrap().project_name, "keep");
    }

    #[test]
    fn delete_orphan_directory_is_partial() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        std::fs::create_dir_all(service.store().project_dir("orphan")).unwrap();
        let result = service.delete_project("orphan");
        assert_eq!(result.status, CommandStatus::PartialSuccess);
        assert_eq!(result.get("directory_removed"), Some(&json!(true)));
        assert_eq!(result.get("registry_removed"), Some(&json!(false)));

        assert_eq!(service.delete_project("ghost").error_kind, Some("not_found"));
    }

    #[test]
    fn delete_with_missing_directory_is_partial() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        service.create_project("demo");
        std::fs::remove_dir_all(service.store().project_dir("demo")).unwrap();

        let result = service.delete_project("demo");
        assert_eq!(result.status, CommandStatus::PartialSuccess);
        assert_eq!(result.get("directory_removed"), Some(&json!(false)));
        assert_eq!(result.get("registry_removed"), Some(&json!(true)));
        assert_eq!(result.get("state_cleared"), Some(&json!(true)));
        assert_eq!(result.get("errors").unwrap().as_array().unwrap().len(), 1);
        assert!(service.store().list().unwrap().is_empty());
        assert_eq!(service.state().active_project(), None);
    }

    #[test]
    fn delete_with_both_halves_failing_is_an_error() {
        let errors = vec!["directory removal failed".to_string(), "registry update failed".to_string()];
        let result = delete_outcome("demo", false, false, &errors);
        assert_eq!(result.status, CommandStatus::Error);
        assert_eq!(result.error_kind, Some("partial_failure"));
        assert!(result.error.as_deref().unwrap().contains("registry update failed"));
    }

    #[test]
    fn delete_of_project_active_in_sibling_resets_marker() {
        let dir = tempfile::tempdir().unwrap();
        let sibling = service(dir.path());
        sibling.create_project("demo");
        let local = service(dir.path());
        let before = local.state().snapshot();

        let result = local.delete_project("demo");
        assert_eq!(result.status, CommandStatus::Success);
        assert_eq!(result.get("was_active"), Some(&json!(true)));
        assert_eq!(result.get("state_cleared"), Some(&json!(false)));
        assert_eq!(local.state().snapshot(), before);

        let marker = local.marker().read().unwrap().unwrap();
        assert_eq!(marker.project_name, "");
        assert_eq!(marker.version, 2);
        assert_eq!(local.cursor().last_seen(), 2);
    }

    #[test]
    fn cursor_advances_before_marker_write() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        // A directory in the marker's place makes every marker write fail.
        std::fs::create_dir_all(service.marker().path()).unwrap();

        let result = service.create_project("demo");
        assert_eq!(result.status, CommandStatus::Success);
        assert_eq!(service.cursor().last_seen(), 1);
        service.select_project("demo");
        assert_eq!(service.cursor().last_seen(), 2);
    }

    #[test]
    fn structural_edit_bumps_and_broadcasts() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        service.create_project("demo");
        let sink = Arc::new(RecordingSink::default());
        let id = service.hub().register(sink.clone());

        let edit = StructuralEdit {
            document: DocumentKey::FrontendData,
            path: vec!["pages".into()],
            action: EditAction::Add {
                item: json!({"id": "PAGE-1", "name": "Home"}),
            },
        };
        service.apply_structural_edit(id, &edit);
        assert_eq!(service.state().version(), 2);
        let events = sink.events();
        assert_eq!(events[0]["type"], "item_added");
        assert_eq!(events[0]["item_id"], "PAGE-1");
        assert_eq!(events[0]["content"]["pages"][0]["name"], "Home");

        let Document::Tree(stored) = service.store().read("demo", DocumentKey::FrontendData).unwrap() else {
            panic!("frontend data is structured");
        };
        assert_eq!(stored["pages"][0]["id"], "PAGE-1");
    }

    #[test]
    fn failed_edit_only_reaches_editor() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        service.create_project("demo");
        let editor = Arc::new(RecordingSink::default());
        let bystander = Arc::new(RecordingSink::default());
        let id = service.hub().register(editor.clone());
        service.hub().register(bystander.clone());

        let edit = StructuralEdit {
            document: DocumentKey::FrontendData,
            path: vec!["pages".into()],
            action: EditAction::Delete { id: "missing".into() },
        };
        service.apply_structural_edit(id, &edit);
        assert_eq!(editor.events()[0]["type"], "error");
        assert!(bystander.events().is_empty());
        assert_eq!(service.state().version(), 1);
    }

    #[test]
    fn ready_falls_back_to_most_recent_project() {
        let dir = tempfile::tempdir().unwrap();
        let first = service(dir.path());
        first.create_project("demo");

        let second = service(dir.path());
        let sink = Arc::new(RecordingSink::default());
        let id = second.hub().register(sink.clone());
        second.send_state(id, false, "request_state");
        assert!(sink.events().is_empty());
        second.send_state(id, true, "ready");
        let events = sink.events();
        assert_eq!(events[0]["type"], "state_initialized");
        assert_eq!(events[0]["project"]["project_name"], "demo");
        assert_eq!(second.state().active_project(), None);
    }

    #[test]
    fn shutdown_cancels_and_disconnects() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let sink = Arc::new(RecordingSink::default());
        service.hub().register(sink.clone());
        let result = service.shutdown();
        assert_eq!(result.get("subscribers_closed"), Some(&json!(1)));
        assert!(service.shutdown_token().is_cancelled());
        assert!(service.hub().is_empty());
        assert_eq!(service.shutdown().get("tasks_cancelled"), Some(&json!(false)));
    }
}
