//! Picks up changes published by sibling processes through the marker file.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::ProjectService;
use crate::error::{Result, SyncError};
use crate::events::{EventKind, ServerEvent};

const COMMAND: &str = "sync";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// No marker, or nothing newer than what this process has seen.
    Unchanged,
    /// A different project (or the first one) was loaded.
    Switched { project: String, version: u64 },
    /// The active project was reloaded from disk.
    Reloaded { project: String, version: u64 },
    /// The marker names no project; local state was cleared.
    Cleared { previous: Option<String> },
}

/// Runs one poll of the marker.
///
/// A marker that cannot be read, or a project that cannot be loaded yet, is
/// an error the caller retries on the next tick. A marker naming a project
/// that no longer exists is adopted and skipped.
pub fn poll_once(service: &ProjectService) -> Result<WatchOutcome> {
    let Some(record) = service.marker().read()? else {
        return Ok(WatchOutcome::Unchanged);
    };
    if record.version <= service.cursor().last_seen() {
        return Ok(WatchOutcome::Unchanged);
    }

    if record.project_name.is_empty() {
        service.cursor().advance(record.version);
        let Some(previous) = service.state().active_project() else {
            return Ok(WatchOutcome::Unchanged);
        };
        let state = service.state().clear(COMMAND);
        let event = ServerEvent::new(
            EventKind::ProjectDeleted {
                project_name: previous.clone(),
            },
            state.version,
            COMMAND,
        );
        service.hub().broadcast(&event);
        return Ok(WatchOutcome::Cleared {
            previous: Some(previous),
        });
    }

    let documents = match service.store().read_all(&record.project_name) {
        Ok(documents) => documents,
        Err(e @ SyncError::NotFound(_)) => {
            service.cursor().advance(record.version);
            return Err(e);
        }
        Err(e) => return Err(e),
    };
    service.cursor().advance(record.version);

    let loaded = service.state().load(&record.project_name, documents, COMMAND);
    let version = loaded.state.version;
    let project = record.project_name;
    if loaded.previous_project.as_deref() == Some(project.as_str()) {
        service.broadcast_documents(&loaded.state, None, COMMAND);
        Ok(WatchOutcome::Reloaded { project, version })
    } else {
        service.broadcast_loaded(&loaded, COMMAND);
        Ok(WatchOutcome::Switched { project, version })
    }
}

/// Polls the marker every `period` until `cancel` fires. Errors are logged
/// and the next tick tries again.
pub async fn run(service: Arc<ProjectService>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(period_ms = period.as_millis() as u64, "marker watcher started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match poll_once(&service) {
            Ok(WatchOutcome::Unchanged) => {}
            Ok(outcome) => info!(?outcome, "adopted change from marker"),
            Err(SyncError::Storage { path, source }) => {
                debug!(path = %path.display(), error = %source, "marker poll failed, retrying")
            }
            Err(e) => warn!(error = %e, "marker names a project that could not be loaded"),
        }
    }
    debug!("marker watcher stopped");
}
