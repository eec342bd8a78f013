//! Messages exchanged with real-time subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::DocumentKey;
use crate::edit::StructuralEdit;
use crate::state::ProjectState;
use crate::store::Documents;

/// Project snapshot carried by state events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectPayload {
    pub project_name: String,
    pub documents: Documents,
}

impl ProjectPayload {
    pub fn from_state(state: &ProjectState) -> Option<Self> {
        state.project_name.as_ref().map(|project_name| Self {
            project_name: project_name.clone(),
            documents: state.documents.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    StateInitialized {
        project: ProjectPayload,
    },
    StateSwitched {
        previous_project: Option<String>,
        project: ProjectPayload,
    },
    DocumentsUpdated {
        project: ProjectPayload,
        #[serde(skip_serializing_if = "Option::is_none")]
        updated_document: Option<DocumentKey>,
    },
    ItemAdded(ItemChange),
    ItemUpdated(ItemChange),
    ItemDeleted(ItemChange),
    ItemRenamed(ItemChange),
    ItemDuplicated(ItemChange),
    ProjectDeleted {
        project_name: String,
    },
    /// Sent only to the subscriber whose request failed.
    Error {
        message: String,
    },
}

/// A structural edit applied to one document; carries the whole new document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemChange {
    pub project_name: String,
    pub document: DocumentKey,
    pub path: Vec<String>,
    pub item_id: String,
    pub content: Value,
}

/// Everything pushed to subscribers is stamped with the state version and a
/// timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    /// The command or task that caused the event.
    pub command: String,
}

impl ServerEvent {
    pub fn new(kind: EventKind, version: u64, command: impl Into<String>) -> Self {
        Self {
            kind,
            version,
            timestamp: Utc::now(),
            command: command.into(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            EventKind::StateInitialized { .. } => "state_initialized",
            EventKind::StateSwitched { .. } => "state_switched",
            EventKind::DocumentsUpdated { .. } => "documents_updated",
            EventKind::ItemAdded(_) => "item_added",
            EventKind::ItemUpdated(_) => "item_updated",
            EventKind::ItemDeleted(_) => "item_deleted",
            EventKind::ItemRenamed(_) => "item_renamed",
            EventKind::ItemDuplicated(_) => "item_duplicated",
            EventKind::ProjectDeleted { .. } => "project_deleted",
            EventKind::Error { .. } => "error",
        }
    }
}

/// Messages a subscriber may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(alias = "client_ready")]
    Ready,
    RequestState,
    Edit(StructuralEdit),
}
