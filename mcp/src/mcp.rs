//! JSON-RPC 2.0 surface exposing the project commands as MCP tools.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::commands::{CommandResult, ProjectService};
use crate::error::SyncError;

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;

const PROTOCOL_VERSION: &str = "2025-06-18";

#[derive(Debug, Serialize, Deserialize)]
pub struct McpRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct McpResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

#[derive(Debug, Serialize)]
pub struct McpError {
    pub code: i32,
    pub message: String,
}

impl McpResponse {
    pub fn result(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(McpError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn parse_error(e: &serde_json::Error) -> Self {
        Self::error(None, PARSE_ERROR, format!("Parse error: {e}"))
    }
}

#[derive(Debug, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

fn project_name_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "project_name": {
                "type": "string",
                "description": description
            }
        },
        "required": ["project_name"]
    })
}

fn no_arguments() -> Value {
    json!({"type": "object", "properties": {}})
}

fn tools() -> Vec<Tool> {
    vec![
        Tool {
            name: "create_project",
            description: "Create a project with the default document set and make it the active project",
            input_schema: project_name_schema("Name of the project (letters, digits and underscores only)"),
        },
        Tool {
            name: "update_document",
            description: "Apply an update to one project document. Structured documents take a JSON object; summary takes markdown text. Text documents always replace.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "project_name": {"type": "string", "description": "Project to update"},
                    "document": {
                        "type": "string",
                        "enum": ["requirement", "ddd", "frontend_data", "technical_architecture", "summary"],
                        "description": "Document to update; file names such as requirement.json are accepted too"
                    },
                    "payload": {
                        "type": ["object", "string"],
                        "description": "Update content: a JSON object for structured documents, a string for summary"
                    },
                    "strategy": {
                        "type": "string",
                        "enum": ["replace", "merge", "append"],
                        "default": "merge",
                        "description": "'replace' overwrites the document; 'merge' and 'append' deep-merge objects and union lists without duplicates"
                    }
                },
                "required": ["project_name", "document", "payload"]
            }),
        },
        Tool {
            name: "get_active_project",
            description: "Return the active project with all documents, its version and the last command applied",
            input_schema: no_arguments(),
        },
        Tool {
            name: "list_projects",
            description: "List registered projects with created/updated timestamps and status",
            input_schema: no_arguments(),
        },
        Tool {
            name: "select_project",
            description: "Load an existing project and make it the active project here and in sibling servers",
            input_schema: project_name_schema("Name of the project to load"),
        },
        Tool {
            name: "delete_project",
            description: "Delete a project's files and registry entry. Clears subscribers if it was active.",
            input_schema: project_name_schema("Name of the project to delete"),
        },
        Tool {
            name: "shutdown",
            description: "Stop background sync tasks and the WebSocket server and disconnect all subscribers",
            input_schema: no_arguments(),
        },
    ]
}

/// Handles one request. Returns `None` for notifications, which get no reply.
pub fn handle_request(request: McpRequest, service: &ProjectService) -> Option<McpResponse> {
    debug!(method = %request.method, id = ?request.id, "handling request");
    if request.method.starts_with("notifications/") {
        return None;
    }
    let response = match request.method.as_str() {
        "initialize" => McpResponse::result(
            request.id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": "project-builder-mcp",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        ),
        "tools/list" => McpResponse::result(request.id, json!({ "tools": tools() })),
        "tools/call" => {
            let Some(params) = request.params.as_ref().and_then(Value::as_object) else {
                return Some(McpResponse::error(request.id, INVALID_PARAMS, "Missing params"));
            };
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return Some(McpResponse::error(request.id, INVALID_PARAMS, "Missing tool name"));
            };
            let empty = Map::new();
            let arguments = params.get("arguments").and_then(Value::as_object).unwrap_or(&empty);
            info!(tool = name, "tool call");
            match call_tool(service, name, arguments) {
                Some(result) => McpResponse::result(request.id, tool_result(&result)),
                None => McpResponse::error(request.id, METHOD_NOT_FOUND, format!("Unknown tool: {name}")),
            }
        }
        _ => McpResponse::error(
            request.id,
            METHOD_NOT_FOUND,
            format!("Method not found: {}", request.method),
        ),
    };
    Some(response)
}

/// Parses and handles one raw line or body.
pub fn handle_raw(raw: &str, service: &ProjectService) -> Option<McpResponse> {
    match serde_json::from_str::<McpRequest>(raw) {
        Ok(request) => handle_request(request, service),
        Err(e) => Some(McpResponse::parse_error(&e)),
    }
}

fn tool_result(result: &CommandResult) -> Value {
    let text = serde_json::to_string_pretty(result).unwrap_or_else(|e| format!("{{\"status\":\"error\",\"error\":\"{e}\"}}"));
    json!({
        "content": [{
            "type": "text",
            "text": text
        }],
        "isError": result.is_error()
    })
}

/// Looks up the first of `names` present in `arguments`.
fn arg<'a>(arguments: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| arguments.get(*name))
}

fn required_str<'a>(arguments: &'a Map<String, Value>, names: &[&str]) -> Result<&'a str, CommandResult> {
    arg(arguments, names)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| CommandResult::from_error(&SyncError::validation(format!("{} is required", names[0]))))
}

fn update_document(service: &ProjectService, arguments: &Map<String, Value>) -> Result<CommandResult, CommandResult> {
    let project = required_str(arguments, &["project_name"])?;
    let document = required_str(arguments, &["document", "file_type"])?;
    let payload = arg(arguments, &["payload", "update_data"])
        .cloned()
        .ok_or_else(|| CommandResult::from_error(&SyncError::validation("payload is required")))?;
    let strategy = arg(arguments, &["strategy", "merge_strategy"]).and_then(Value::as_str);
    Ok(service.update_document(project, document, payload, strategy))
}

fn call_tool(service: &ProjectService, name: &str, arguments: &Map<String, Value>) -> Option<CommandResult> {
    let result = match name {
        "create_project" => required_str(arguments, &["project_name"]).map(|project| service.create_project(project)),
        "update_document" => update_document(service, arguments),
        "get_active_project" => Ok(service.get_active_project()),
        "list_projects" => Ok(service.list_projects()),
        "select_project" => required_str(arguments, &["project_name"]).map(|project| service.select_project(project)),
        "delete_project" => required_str(arguments, &["project_name"]).map(|project| service.delete_project(project)),
        "shutdown" => Ok(service.shutdown()),
        _ => return None,
    };
    Some(result.unwrap_or_else(|error| error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::service;

    fn call(service: &ProjectService, id: u64, method: &str, params: Value) -> Value {
        let request = McpRequest {
            jsonrpc: "2.0".into(),
            id: Some(json!(id)),
            method: method.into(),
            params: Some(params),
        };
        serde_json::to_value(handle_request(request, service).unwrap()).unwrap()
    }

    fn tool_payload(response: &Value) -> Value {
        serde_json::from_str(response["result"]["content"][0]["text"].as_str().unwrap()).unwrap()
    }

    #[test]
    fn initialize_and_list_tools() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let init = call(&service, 1, "initialize", json!({}));
        assert_eq!(init["result"]["serverInfo"]["name"], "project-builder-mcp");

        let listed = call(&service, 2, "tools/list", json!({}));
        let names: Vec<&str> = listed["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|tool| tool["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            [
                "create_project",
                "update_document",
                "get_active_project",
                "list_projects",
                "select_project",
                "delete_project",
                "shutdown"
            ]
        );
    }

    #[test]
    fn tool_calls_wrap_command_results() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let created = call(
            &service,
            1,
            "tools/call",
            json!({"name": "create_project", "arguments": {"project_name": "demo1"}}),
        );
        assert_eq!(created["result"]["isError"], false);
        assert_eq!(tool_payload(&created)["status"], "success");

        let updated = call(
            &service,
            2,
            "tools/call",
            json!({"name": "update_document", "arguments": {
                "project_name": "demo1",
                "file_type": "requirement.js",
                "update_data": {"features": ["login"]},
                "merge_strategy": "merge"
            }}),
        );
        assert_eq!(tool_payload(&updated)["version"], 2);

        let missing = call(&service, 3, "tools/call", json!({"name": "select_project", "arguments": {}}));
        assert_eq!(missing["result"]["isError"], true);
        assert_eq!(tool_payload(&missing)["error_kind"], "validation");
    }

    #[test]
    fn protocol_errors() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        assert_eq!(call(&service, 1, "bogus", json!({}))["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(
            call(&service, 2, "tools/call", json!({"name": "nope"}))["error"]["code"],
            METHOD_NOT_FOUND
        );
        let request = McpRequest {
            jsonrpc: "2.0".into(),
            id: Some(json!(3)),
            method: "tools/call".into(),
            params: None,
        };
        assert_eq!(handle_request(request, &service).unwrap().error.unwrap().code, INVALID_PARAMS);

        let parse = handle_raw("{not json", &service).unwrap();
        assert_eq!(parse.error.unwrap().code, PARSE_ERROR);
        assert!(handle_raw(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#, &service).is_none());
    }
}
