use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::error::SyncError;

/// Whether a document holds a structured tree or free text. Fixed per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Structured,
    Text,
}

/// The fixed document set every project carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocumentKey {
    Requirement,
    Ddd,
    FrontendData,
    TechnicalArchitecture,
    Summary,
}

impl DocumentKey {
    pub const ALL: [DocumentKey; 5] = [
        DocumentKey::Requirement,
        DocumentKey::Ddd,
        DocumentKey::FrontendData,
        DocumentKey::TechnicalArchitecture,
        DocumentKey::Summary,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            DocumentKey::Requirement => "requirement",
            DocumentKey::Ddd => "ddd",
            DocumentKey::FrontendData => "frontend_data",
            DocumentKey::TechnicalArchitecture => "technical_architecture",
            DocumentKey::Summary => "summary",
        }
    }

    pub const fn category(self) -> Category {
        match self {
            DocumentKey::Summary => Category::Text,
            _ => Category::Structured,
        }
    }

    pub fn file_name(self) -> String {
        match self.category() {
            Category::Structured => format!("{}.json", self.as_str()),
            Category::Text => format!("{}.md", self.as_str()),
        }
    }

    /// Empty skeleton written when a project is created.
    pub fn default_document(self, project: &str, now: DateTime<Utc>) -> Document {
        let tree = match self {
            DocumentKey::Requirement => json!({
                "project_name": project,
                "requirements": [],
                "user_flows": [],
                "features": [],
                "pages": [],
                "created_at": now.to_rfc3339(),
            }),
            DocumentKey::Ddd => json!({
                "bounded_contexts": [],
                "entities": [],
                "value_objects": [],
                "aggregates": [],
                "services": [],
                "repositories": [],
                "domain_events": [],
            }),
            DocumentKey::FrontendData => json!({
                "pages": [],
                "theme": { "colors": {}, "fonts": {} },
                "interactions": [],
            }),
            DocumentKey::TechnicalArchitecture => json!({
                "architecture_patterns": [],
                "technology_stack": {
                    "frontend": [],
                    "backend": [],
                    "database": [],
                    "infrastructure": [],
                },
                "system_components": [],
                "api_design": {
                    "rest_endpoints": [],
                    "graphql_schema": [],
                    "websocket_events": [],
                },
                "data_models": [],
                "security": {
                    "authentication": [],
                    "authorization": [],
                    "encryption": [],
                },
                "deployment": {
                    "environments": [],
                    "ci_cd": [],
                    "monitoring": [],
                },
                "scalability": {
                    "caching_strategy": [],
                    "load_balancing": [],
                    "database_optimization": [],
                },
            }),
            DocumentKey::Summary => {
                return Document::Text(format!(
                    "# {project}\n\n## Project Summary\n\n**Created:** {}\n\n## Status\n\nStatus: Initialized\n",
                    now.format("%B %d, %Y at %I:%M %p")
                ));
            }
        };
        match tree {
            Value::Object(map) => Document::Tree(map),
            _ => Document::empty(Category::Structured),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentKey {
    type Err = SyncError;

    /// Accepts the key name, its file name, or the historical `.js` file name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stem = s
            .strip_suffix(".json")
            .or_else(|| s.strip_suffix(".js"))
            .or_else(|| s.strip_suffix(".md"))
            .unwrap_or(s);
        match stem {
            "requirement" | "requirements" => Ok(DocumentKey::Requirement),
            "ddd" => Ok(DocumentKey::Ddd),
            "frontend_data" => Ok(DocumentKey::FrontendData),
            "technical_architecture" => Ok(DocumentKey::TechnicalArchitecture),
            "summary" => Ok(DocumentKey::Summary),
            _ => Err(SyncError::validation(format!(
                "unknown document '{s}', expected one of: {}",
                DocumentKey::ALL.map(DocumentKey::as_str).join(", ")
            ))),
        }
    }
}

impl Serialize for DocumentKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DocumentKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A stored document: a JSON object tree or a block of free text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Document {
    Tree(Map<String, Value>),
    Text(String),
}

impl Document {
    pub fn empty(category: Category) -> Self {
        match category {
            Category::Structured => Document::Tree(Map::new()),
            Category::Text => Document::Text(String::new()),
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Document::Tree(_) => Category::Structured,
            Document::Text(_) => Category::Text,
        }
    }

    /// Interprets an update payload for a document of `category`.
    ///
    /// Structured documents accept a JSON object, or a string holding one.
    pub fn from_payload(category: Category, payload: Value) -> Result<Self, SyncError> {
        match (category, payload) {
            (Category::Structured, Value::Object(map)) => Ok(Document::Tree(map)),
            (Category::Structured, Value::String(raw)) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => Ok(Document::Tree(map)),
                Ok(other) => Err(SyncError::validation(format!(
                    "structured documents need an object payload, got {}",
                    type_name(&other)
                ))),
                Err(e) => Err(SyncError::validation(format!("invalid JSON in payload: {e}"))),
            },
            (Category::Structured, other) => Err(SyncError::validation(format!(
                "structured documents need an object payload, got {}",
                type_name(&other)
            ))),
            (Category::Text, Value::String(text)) => Ok(Document::Text(text)),
            (Category::Text, other) => Err(SyncError::validation(format!(
                "text documents need a string payload, got {}",
                type_name(&other)
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Document::Tree(map) => Value::Object(map.clone()),
            Document::Text(text) => Value::String(text.clone()),
        }
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
