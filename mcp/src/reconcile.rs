//! Periodic re-read of the active project to catch edits made to its files
//! outside any command, e.g. by hand or by a sibling that skipped the marker.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::ProjectService;
use crate::error::Result;

/// Compares the active project on disk with what was last broadcast (the
/// in-memory state) and rebroadcasts only when they differ. Returns whether a
/// broadcast happened.
///
/// The marker is not rewritten: every process reconciles against the same
/// files on its own.
pub fn reconcile_once(service: &ProjectService) -> Result<bool> {
    let state = service.state().snapshot();
    let Some(project) = state.project_name.as_deref() else {
        return Ok(false);
    };
    let on_disk = service.store().read_all(project)?;
    if on_disk == state.documents {
        return Ok(false);
    }
    let loaded = service.state().load(project, on_disk, "reconcile");
    service.broadcast_documents(&loaded.state, None, "reconcile");
    Ok(true)
}

pub async fn run(service: Arc<ProjectService>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match reconcile_once(&service) {
            Ok(true) => info!(version = service.state().version(), "active project changed on disk"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "reconciliation failed"),
        }
    }
    debug!("reconciliation stopped");
}
