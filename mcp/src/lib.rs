//! Versioned project state shared across MCP server processes and pushed to
//! real-time subscribers.

pub mod commands;
pub mod config;
pub mod dev_server;
pub mod document;
pub mod edit;
pub mod error;
pub mod events;
pub mod http_server;
pub mod hub;
pub mod marker;
pub mod mcp;
pub mod merge;
pub mod reconcile;
pub mod runtime;
pub mod state;
pub mod store;
pub mod watcher;
pub mod ws;

pub use commands::{CommandResult, CommandStatus, ProjectService};
pub use config::Config;
pub use error::{Result, SyncError};
