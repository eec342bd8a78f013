//! Combines a stored document with an update payload.
//!
//! Documents are JSON trees (object / ordered sequence / scalar). One
//! structural merge walks both trees together:
//!
//! - object with object: merge key by key, recursing on collisions
//! - sequence with sequence: keep the current elements, then append each
//!   update element not already present (deep equality)
//! - anything else: the update wins
//!
//! Nothing is ever removed by `merge`, which makes it idempotent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::Document;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Replace,
    #[default]
    Merge,
    /// Same behaviour as `Merge`; kept as its own name for callers.
    Append,
}

impl Strategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Strategy::Replace => "replace",
            Strategy::Merge => "merge",
            Strategy::Append => "append",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replace" => Ok(Strategy::Replace),
            "merge" => Ok(Strategy::Merge),
            "append" => Ok(Strategy::Append),
            other => Err(SyncError::validation(format!(
                "invalid merge strategy '{other}', must be 'replace', 'merge', or 'append'"
            ))),
        }
    }
}

/// Applies `update` to `current` under `strategy`.
///
/// Fails when the update's category differs from the stored document's.
/// Text documents only support replacement, so every strategy replaces them.
pub fn apply(current: &Document, update: Document, strategy: Strategy) -> Result<Document, SyncError> {
    match (current, update) {
        (Document::Tree(base), Document::Tree(patch)) => Ok(match strategy {
            Strategy::Replace => Document::Tree(patch),
            Strategy::Merge | Strategy::Append => Document::Tree(merge_objects(base.clone(), patch)),
        }),
        (Document::Text(_), update @ Document::Text(_)) => Ok(update),
        (current, update) => Err(SyncError::validation(format!(
            "update payload is {:?} but the document is {:?}",
            update.category(),
            current.category()
        ))),
    }
}

/// Deep-merges two JSON values; `update` wins on scalar or mismatched collisions.
pub fn merge_values(current: Value, update: Value) -> Value {
    match (current, update) {
        (Value::Object(base), Value::Object(patch)) => Value::Object(merge_objects(base, patch)),
        (Value::Array(base), Value::Array(patch)) => Value::Array(union_sequences(base, patch)),
        (_, update) => update,
    }
}

fn merge_objects(mut base: Map<String, Value>, patch: Map<String, Value>) -> Map<String, Value> {
    for (key, incoming) in patch {
        let merged = match base.remove(&key) {
            Some(existing) => merge_values(existing, incoming),
            None => incoming,
        };
        base.insert(key, merged);
    }
    base
}

fn union_sequences(mut base: Vec<Value>, patch: Vec<Value>) -> Vec<Value> {
    for item in patch {
        if !base.contains(&item) {
            base.push(item);
        }
    }
    base
}
