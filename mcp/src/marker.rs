//! Shared marker record that lets independent processes notice changes made
//! by a sibling.
//!
//! Every process polls the same `current_project.json`. A reader adopts a
//! record only when its version is strictly greater than the last version it
//! has seen, so stale or replayed markers are ignored.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::store::write_atomic;

const MARKER_FILE: &str = "current_project.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    /// Empty when no project is active.
    pub project_name: String,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MarkerFile {
    path: PathBuf,
}

impl MarkerFile {
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(MARKER_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `None` when no marker has been written yet.
    ///
    /// A file caught mid-write or otherwise unparsable is an error; callers
    /// polling the marker treat that as transient.
    pub fn read(&self) -> Result<Option<MarkerRecord>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SyncError::storage(&self.path, e)),
        };
        serde_json::from_str(&raw).map(Some).map_err(|e| {
            SyncError::storage(&self.path, std::io::Error::new(ErrorKind::InvalidData, e))
        })
    }

    /// Builds the next record for `project` under a version above both the
    /// current marker and `floor` (the caller's last seen version), so an
    /// unreadable marker never resets the sequence below what siblings have
    /// seen.
    ///
    /// The read-increment-write is not atomic across processes; two writers
    /// racing may publish the same version and one of them goes unnoticed by
    /// siblings until the next write.
    pub fn next_record(&self, project: &str, floor: u64, now: DateTime<Utc>) -> MarkerRecord {
        let previous = self.read().ok().flatten().map_or(0, |record| record.version);
        MarkerRecord {
            project_name: project.to_string(),
            version: previous.max(floor) + 1,
            timestamp: now,
        }
    }

    pub fn write(&self, record: &MarkerRecord) -> Result<()> {
        let raw = serde_json::to_vec_pretty(record).map_err(|source| SyncError::Encode {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, &raw)
    }
}

/// Highest marker version this process has seen, written or adopted.
#[derive(Debug, Default)]
pub struct SyncCursor {
    last_seen: AtomicU64,
}

impl SyncCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen.load(Ordering::Acquire)
    }

    /// Records `version` if it is newer. Returns true when it was adopted.
    pub fn advance(&self, version: u64) -> bool {
        self.last_seen.fetch_max(version, Ordering::AcqRel) < version
    }
}
