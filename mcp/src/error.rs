use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the document store, merge engine and command layer.
///
/// Command handlers never propagate these past the tool boundary; they are
/// folded into a [`CommandResult`](crate::commands::CommandResult) with an
/// explicit status.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("project '{project}' is incomplete, missing {missing:?}")]
    Incomplete {
        project: String,
        missing: Vec<String>,
    },

    #[error("partial failure: {0}")]
    PartialFailure(String),
}

impl SyncError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable category, reported alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Storage { .. } | Self::Encode { .. } | Self::Incomplete { .. } => "storage",
            Self::PartialFailure(_) => "partial_failure",
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// A single subscriber could not be reached. Never aborts a broadcast.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("subscriber {subscriber} unreachable: {reason}")]
pub struct DeliveryError {
    pub subscriber: u64,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}
