//! Durable project storage.
//!
//! Layout under the data directory:
//!
//! ```text
//! projects/<name>/requirement.json ... summary.md
//! project_registry.json
//! current_project.json   (marker record, see `marker`)
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::document::{Category, Document, DocumentKey};
use crate::error::{Result, SyncError};

pub type Documents = BTreeMap<DocumentKey, Document>;

const PROJECTS_DIR: &str = "projects";
const REGISTRY_FILE: &str = "project_registry.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Initialized,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub project_name: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub status: ProjectStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryMeta {
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    status: ProjectStatus,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Registry {
    #[serde(default)]
    projects: BTreeMap<String, RegistryMeta>,
}

/// Outcome of deleting a project. Both halves are always attempted.
#[derive(Debug)]
pub struct DeleteReport {
    pub directory: Result<()>,
    pub registry: Result<()>,
}

impl DeleteReport {
    pub fn directory_removed(&self) -> bool {
        self.directory.is_ok()
    }

    pub fn registry_removed(&self) -> bool {
        self.registry.is_ok()
    }

    pub fn errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Err(e) = &self.directory {
            errors.push(format!("directory removal failed: {e}"));
        }
        if let Err(e) = &self.registry {
            errors.push(format!("registry update failed: {e}"));
        }
        errors
    }
}

/// Rejects anything but ASCII letters, digits and underscores.
pub fn validate_project_name(name: &str) -> Result<()> {
    static NAME: OnceLock<Regex> = OnceLock::new();
    let pattern = NAME.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("static pattern"));
    if name.is_empty() {
        return Err(SyncError::validation("project_name is required"));
    }
    if !pattern.is_match(name) {
        return Err(SyncError::validation(
            "project_name must be alphanumeric with underscores only",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
    /// Serializes registry read-modify-write cycles within this process.
    registry_lock: Arc<Mutex<()>>,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            registry_lock: Arc::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.root.join(PROJECTS_DIR).join(project)
    }

    fn registry_path(&self) -> PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    pub fn exists(&self, project: &str) -> bool {
        self.project_dir(project).is_dir()
    }

    /// Creates the project directory with the default document set and
    /// registers it.
    pub fn create(&self, project: &str, now: DateTime<Utc>) -> Result<Documents> {
        validate_project_name(project)?;
        if self.exists(project) {
            return Err(SyncError::validation(format!("Project '{project}' already exists")));
        }
        let dir = self.project_dir(project);
        fs::create_dir_all(&dir).map_err(|e| SyncError::storage(&dir, e))?;

        let mut documents = Documents::new();
        for key in DocumentKey::ALL {
            let document = key.default_document(project, now);
            write_document(&dir.join(key.file_name()), &document)?;
            documents.insert(key, document);
        }

        self.modify_registry(|registry| {
            registry.projects.insert(
                project.to_string(),
                RegistryMeta {
                    created_at: now,
                    last_updated: now,
                    status: ProjectStatus::Initialized,
                },
            );
            Ok(())
        })?;
        debug!(project, dir = %dir.display(), "created project");
        Ok(documents)
    }

    /// Reads one document.
    ///
    /// A corrupted structured document degrades to an empty tree. A missing
    /// text document reads as empty text.
    pub fn read(&self, project: &str, key: DocumentKey) -> Result<Document> {
        if !self.exists(project) {
            return Err(SyncError::not_found(format!("Project '{project}' does not exist")));
        }
        let path = self.project_dir(project).join(key.file_name());
        match read_document(&path, key.category())? {
            Some(document) => Ok(document),
            None if key.category() == Category::Text => Ok(Document::empty(Category::Text)),
            None => Err(SyncError::not_found(format!(
                "File '{}' not found in project '{project}'",
                key.file_name()
            ))),
        }
    }

    /// Reads the whole document set. Fails when a structured document is
    /// missing.
    pub fn read_all(&self, project: &str) -> Result<Documents> {
        if !self.exists(project) {
            return Err(SyncError::not_found(format!("Project '{project}' does not exist")));
        }
        let dir = self.project_dir(project);
        let mut documents = Documents::new();
        let mut missing = Vec::new();
        for key in DocumentKey::ALL {
            match read_document(&dir.join(key.file_name()), key.category())? {
                Some(document) => {
                    documents.insert(key, document);
                }
                None if key.category() == Category::Text => {
                    documents.insert(key, Document::empty(Category::Text));
                }
                None => missing.push(key.file_name()),
            }
        }
        if !missing.is_empty() {
            return Err(SyncError::Incomplete {
                project: project.to_string(),
                missing,
            });
        }
        Ok(documents)
    }

    /// Writes one document and stamps the registry entry.
    pub fn write(&self, project: &str, key: DocumentKey, document: &Document, now: DateTime<Utc>) -> Result<()> {
        if !self.exists(project) {
            return Err(SyncError::not_found(format!("Project '{project}' does not exist")));
        }
        if document.category() != key.category() {
            return Err(SyncError::validation(format!(
                "'{key}' holds {:?} content, got {:?}",
                key.category(),
                document.category()
            )));
        }
        write_document(&self.project_dir(project).join(key.file_name()), document)?;
        self.modify_registry(|registry| {
            let entry = registry
                .projects
                .entry(project.to_string())
                .or_insert_with(|| RegistryMeta {
                    created_at: now,
                    last_updated: now,
                    status: ProjectStatus::Updated,
                });
            entry.last_updated = now;
            entry.status = ProjectStatus::Updated;
            Ok(())
        })
    }

    /// Removes the project directory and its registry entry independently.
    pub fn delete(&self, project: &str) -> DeleteReport {
        let dir = self.project_dir(project);
        let directory = fs::remove_dir_all(&dir).map_err(|e| SyncError::storage(&dir, e));
        let registry = self.modify_registry(|registry| match registry.projects.remove(project) {
            Some(_) => Ok(()),
            None => Err(SyncError::not_found(format!("Project '{project}' not found in registry"))),
        });
        DeleteReport { directory, registry }
    }

    /// True when either the directory or a registry entry exists.
    pub fn is_known(&self, project: &str) -> Result<bool> {
        Ok(self.exists(project) || self.read_registry()?.projects.contains_key(project))
    }

    pub fn list(&self) -> Result<Vec<RegistryEntry>> {
        Ok(self
            .read_registry()?
            .projects
            .into_iter()
            .map(|(project_name, meta)| RegistryEntry {
                project_name,
                created_at: meta.created_at,
                last_updated: meta.last_updated,
                status: meta.status,
            })
            .collect())
    }

    /// The registry entry touched most recently, if any.
    pub fn most_recent(&self) -> Result<Option<RegistryEntry>> {
        Ok(self.list()?.into_iter().max_by_key(|entry| entry.last_updated))
    }

    fn read_registry(&self) -> Result<Registry> {
        let path = self.registry_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Registry::default()),
            Err(e) => return Err(SyncError::storage(&path, e)),
        };
        if raw.trim().is_empty() {
            return Ok(Registry::default());
        }
        match serde_json::from_str(&raw) {
            Ok(registry) => Ok(registry),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "registry is corrupted, treating as empty");
                Ok(Registry::default())
            }
        }
    }

    fn modify_registry(&self, f: impl FnOnce(&mut Registry) -> Result<()>) -> Result<()> {
        let _guard = self.registry_lock.lock();
        let mut registry = self.read_registry()?;
        f(&mut registry)?;
        let path = self.registry_path();
        let raw = serde_json::to_string_pretty(&registry).map_err(|source| SyncError::Encode {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, raw.as_bytes())
    }
}

fn read_document(path: &Path, category: Category) -> Result<Option<Document>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SyncError::storage(path, e)),
    };
    let document = match category {
        Category::Text => Document::Text(raw),
        Category::Structured if raw.trim().is_empty() => Document::empty(Category::Structured),
        Category::Structured => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Document::Tree(map),
            Ok(_) | Err(_) => {
                warn!(path = %path.display(), "corrupted document, using empty default");
                Document::empty(Category::Structured)
            }
        },
    };
    Ok(Some(document))
}

fn write_document(path: &Path, document: &Document) -> Result<()> {
    match document {
        Document::Text(text) => write_atomic(path, text.as_bytes()),
        Document::Tree(map) => {
            let raw = serde_json::to_string_pretty(map).map_err(|source| SyncError::Encode {
                path: path.to_path_buf(),
                source,
            })?;
            write_atomic(path, raw.as_bytes())
        }
    }
}

/// Writes through a uniquely named sibling temp file and renames it into
/// place, so readers never see a half-written file and concurrent writers
/// never share a temp path.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| SyncError::storage(parent, e))?;
    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| SyncError::storage(parent, e))?;
    tmp.write_all(contents).map_err(|e| SyncError::storage(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| SyncError::storage(path, e.error))?;
    Ok(())
}
