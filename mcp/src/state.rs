use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::document::{Document, DocumentKey};
use crate::error::{Result, SyncError};
use crate::store::Documents;

/// In-memory view of the active project.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectState {
    pub project_name: Option<String>,
    pub documents: Documents,
    pub version: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_command: String,
}

impl ProjectState {
    pub fn is_active(&self, project: &str) -> bool {
        self.project_name.as_deref() == Some(project)
    }
}

/// Result of replacing the loaded project.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub previous_project: Option<String>,
    pub state: ProjectState,
}

impl Loaded {
    /// True when a different project was loaded before.
    pub fn switched(&self) -> bool {
        match (&self.previous_project, &self.state.project_name) {
            (Some(previous), Some(current)) => previous != current,
            _ => false,
        }
    }
}

/// Per-process cache of the active project's documents.
///
/// Every mutation bumps `version` by exactly one and stamps `last_updated`.
/// There is no way to change documents without a bump.
#[derive(Debug, Default)]
pub struct StateStore {
    inner: Mutex<ProjectState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProjectState {
        self.inner.lock().clone()
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    pub fn active_project(&self) -> Option<String> {
        self.inner.lock().project_name.clone()
    }

    /// Replaces the whole state with `documents` of `project`.
    pub fn load(&self, project: &str, documents: Documents, command: &str) -> Loaded {
        let mut state = self.inner.lock();
        let previous_project = state.project_name.replace(project.to_string());
        state.documents = documents;
        bump(&mut state, command);
        Loaded {
            previous_project,
            state: state.clone(),
        }
    }

    /// Replaces one document of the active project.
    pub fn update(&self, key: DocumentKey, document: Document, command: &str) -> Result<ProjectState> {
        let mut state = self.inner.lock();
        if state.project_name.is_none() {
            return Err(SyncError::not_found("no project is active"));
        }
        state.documents.insert(key, document);
        bump(&mut state, command);
        Ok(state.clone())
    }

    /// Forgets the active project.
    pub fn clear(&self, command: &str) -> ProjectState {
        let mut state = self.inner.lock();
        state.project_name = None;
        state.documents.clear();
        bump(&mut state, command);
        state.clone()
    }
}

fn bump(state: &mut ProjectState, command: &str) {
    state.version += 1;
    state.last_updated = Some(Utc::now());
    state.last_command = command.to_string();
}
