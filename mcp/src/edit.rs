//! Fine-grained structural edits sent by subscribers.
//!
//! An edit targets a collection (a sequence of objects carrying an `id`)
//! inside one structured document. `path` alternates collection keys and item
//! ids and always ends on a collection key:
//!
//! ```text
//! ["pages"]                          -> document.pages
//! ["pages", "PAGE-1", "components"]  -> components of the page with id PAGE-1
//! ```

use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::document::{type_name, DocumentKey};
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StructuralEdit {
    #[serde(default = "default_document")]
    pub document: DocumentKey,
    #[serde(default = "default_path")]
    pub path: Vec<String>,
    #[serde(flatten)]
    pub action: EditAction,
}

fn default_document() -> DocumentKey {
    DocumentKey::FrontendData
}

fn default_path() -> Vec<String> {
    vec!["pages".to_string()]
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EditAction {
    /// Appends `item`; an id is generated when it has none.
    Add { item: Value },
    /// Overwrites the listed top-level fields of the item. The id is kept.
    Update { id: String, fields: Map<String, Value> },
    Delete { id: String },
    Rename { id: String, name: String },
    /// Appends a deep copy under a fresh id, its name suffixed " (Copy)".
    Duplicate { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    Added,
    Updated,
    Deleted,
    Renamed,
    Duplicated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub kind: EditKind,
    /// Id of the added, changed, removed, or newly duplicated item.
    pub item_id: String,
}

/// Applies `action` to the collection at `path` inside `tree`.
pub fn apply_edit(tree: &mut Map<String, Value>, path: &[String], action: &EditAction) -> Result<EditOutcome> {
    let create = matches!(action, EditAction::Add { .. });
    let items = collection_mut(tree, path, create)?;

    match action {
        EditAction::Add { item } => {
            let Value::Object(item) = item else {
                return Err(SyncError::validation(format!(
                    "new items must be objects, got {}",
                    type_name(item)
                )));
            };
            let mut item = item.clone();
            let item_id = match item.get("id").and_then(id_string) {
                Some(id) if !items.iter().any(|existing| has_id(existing, &id)) => id,
                Some(id) => return Err(SyncError::validation(format!("item '{id}' already exists"))),
                None => {
                    let id = new_item_id();
                    item.insert("id".to_string(), Value::String(id.clone()));
                    id
                }
            };
            items.push(Value::Object(item));
            Ok(EditOutcome {
                kind: EditKind::Added,
                item_id,
            })
        }
        EditAction::Update { id, fields } => {
            let item = find_object(items, id)?;
            for (key, value) in fields {
                if key != "id" {
                    item.insert(key.clone(), value.clone());
                }
            }
            Ok(EditOutcome {
                kind: EditKind::Updated,
                item_id: id.clone(),
            })
        }
        EditAction::Delete { id } => {
            let index = position(items, id)?;
            items.remove(index);
            Ok(EditOutcome {
                kind: EditKind::Deleted,
                item_id: id.clone(),
            })
        }
        EditAction::Rename { id, name } => {
            find_object(items, id)?.insert("name".to_string(), Value::String(name.clone()));
            Ok(EditOutcome {
                kind: EditKind::Renamed,
                item_id: id.clone(),
            })
        }
        EditAction::Duplicate { id } => {
            let mut copy = find_object(items, id)?.clone();
            let item_id = new_item_id();
            copy.insert("id".to_string(), Value::String(item_id.clone()));
            if let Some(Value::String(name)) = copy.get("name") {
                let renamed = format!("{name} (Copy)");
                copy.insert("name".to_string(), Value::String(renamed));
            }
            items.push(Value::Object(copy));
            Ok(EditOutcome {
                kind: EditKind::Duplicated,
                item_id,
            })
        }
    }
}

fn collection_mut<'a>(obj: &'a mut Map<String, Value>, path: &[String], create: bool) -> Result<&'a mut Vec<Value>> {
    match path {
        [key] => {
            if create {
                obj.entry(key.clone()).or_insert_with(|| Value::Array(Vec::new()));
            }
            match obj.get_mut(key) {
                Some(Value::Array(items)) => Ok(items),
                Some(other) => Err(SyncError::validation(format!(
                    "'{key}' is {}, not a list",
                    type_name(other)
                ))),
                None => Err(SyncError::not_found(format!("collection '{key}' not found"))),
            }
        }
        [key, id, rest @ ..] if !rest.is_empty() => {
            let items = match obj.get_mut(key) {
                Some(Value::Array(items)) => items,
                Some(other) => {
                    return Err(SyncError::validation(format!(
                        "'{key}' is {}, not a list",
                        type_name(other)
                    )))
                }
                None => return Err(SyncError::not_found(format!("collection '{key}' not found"))),
            };
            collection_mut(find_object(items, id)?, rest, create)
        }
        _ => Err(SyncError::validation(
            "path must alternate collection keys and item ids and end with a collection key",
        )),
    }
}

fn find_object<'a>(items: &'a mut [Value], id: &str) -> Result<&'a mut Map<String, Value>> {
    match items.iter_mut().find(|item| has_id(item, id)) {
        Some(Value::Object(item)) => Ok(item),
        Some(_) => Err(SyncError::validation(format!("item '{id}' is not an object"))),
        None => Err(SyncError::not_found(format!("item '{id}' not found"))),
    }
}

fn position(items: &[Value], id: &str) -> Result<usize> {
    items
        .iter()
        .position(|item| has_id(item, id))
        .ok_or_else(|| SyncError::not_found(format!("item '{id}' not found")))
}

fn has_id(item: &Value, id: &str) -> bool {
    item.get("id").and_then(id_string).is_some_and(|found| found == id)
}

/// Ids may be stored as strings or numbers.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn new_item_id() -> String {
    format!("ITEM-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn frontend() -> Map<String, Value> {
        json!({
            "pages": [
                {"id": "PAGE-1", "name": "Home", "components": [{"id": "C1", "kind": "button"}]},
                {"id": "PAGE-2", "name": "About", "components": []}
            ],
            "theme": {}
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn pages() -> Vec<String> {
        vec!["pages".into()]
    }

    #[test]
    fn add_generates_missing_ids() {
        let mut tree = frontend();
        let outcome = apply_edit(&mut tree, &pages(), &EditAction::Add { item: json!({"name": "Blog"}) }).unwrap();
        assert_eq!(outcome.kind, EditKind::Added);
        assert!(outcome.item_id.starts_with("ITEM-"));
        let pages = tree["pages"].as_array().unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[2]["id"], json!(outcome.item_id));
    }

    #[test]
    fn add_creates_missing_collection_and_rejects_duplicates() {
        let mut tree = Map::new();
        apply_edit(&mut tree, &pages(), &EditAction::Add { item: json!({"id": "P"}) }).unwrap();
        assert_eq!(tree["pages"], json!([{"id": "P"}]));
        let err = apply_edit(&mut tree, &pages(), &EditAction::Add { item: json!({"id": "P"}) }).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn update_rename_and_delete() {
        let mut tree = frontend();
        let mut fields = Map::new();
        fields.insert("route".into(), json!("/home"));
        fields.insert("id".into(), json!("HIJACK"));
        apply_edit(
            &mut tree,
            &pages(),
            &EditAction::Update {
                id: "PAGE-1".into(),
                fields,
            },
        )
        .unwrap();
        assert_eq!(tree["pages"][0]["route"], "/home");
        assert_eq!(tree["pages"][0]["id"], "PAGE-1");

        apply_edit(
            &mut tree,
            &pages(),
            &EditAction::Rename {
                id: "PAGE-2".into(),
                name: "Team".into(),
            },
        )
        .unwrap();
        assert_eq!(tree["pages"][1]["name"], "Team");

        apply_edit(&mut tree, &pages(), &EditAction::Delete { id: "PAGE-1".into() }).unwrap();
        assert_eq!(tree["pages"].as_array().unwrap().len(), 1);
        assert_eq!(tree["pages"][0]["id"], "PAGE-2");
    }

    #[test]
    fn duplicate_copies_deeply_under_new_id() {
        let mut tree = frontend();
        let outcome = apply_edit(&mut tree, &pages(), &EditAction::Duplicate { id: "PAGE-1".into() }).unwrap();
        let copy = &tree["pages"][2];
        assert_eq!(copy["id"], json!(outcome.item_id));
        assert_eq!(copy["name"], "Home (Copy)");
        assert_eq!(copy["components"], tree["pages"][0]["components"]);
    }

    #[test]
    fn nested_paths_reach_child_collections() {
        let mut tree = frontend();
        let path: Vec<String> = vec!["pages".into(), "PAGE-1".into(), "components".into()];
        apply_edit(&mut tree, &path, &EditAction::Delete { id: "C1".into() }).unwrap();
        assert_eq!(tree["pages"][0]["components"], json!([]));
    }

    #[test]
    fn unknown_ids_and_bad_paths_fail() {
        let mut tree = frontend();
        let err = apply_edit(&mut tree, &pages(), &EditAction::Delete { id: "nope".into() }).unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));

        let err = apply_edit(&mut tree, &["pages".to_string(), "PAGE-1".to_string()], &EditAction::Delete { id: "x".into() })
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        let err = apply_edit(&mut tree, &["theme".to_string()], &EditAction::Delete { id: "x".into() }).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }
}
