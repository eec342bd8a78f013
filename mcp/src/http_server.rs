use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};
use warp::{Filter, Rejection, Reply};

use crate::commands::ProjectService;
use crate::config::Config;
use crate::mcp::{self, McpResponse};
use crate::runtime::Runtime;
use crate::ws;

#[derive(Debug, Serialize)]
struct ApiResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

impl ApiResponse {
    fn ok_with_data(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

fn with_service(service: Arc<ProjectService>) -> impl Filter<Extract = (Arc<ProjectService>,), Error = Infallible> + Clone {
    warp::any().map(move || service.clone())
}

async fn handle_mcp(body: warp::hyper::body::Bytes, service: Arc<ProjectService>) -> Result<impl Reply, Rejection> {
    debug!(bytes = body.len(), "MCP request received");
    let response = match std::str::from_utf8(&body) {
        Ok(raw) => mcp::handle_raw(raw, &service),
        Err(e) => Some(McpResponse::error(None, mcp::PARSE_ERROR, format!("Parse error: {e}"))),
    };
    let reply = match response {
        Some(response) => warp::reply::json(&response).into_response(),
        None => warp::reply::with_status(warp::reply(), warp::http::StatusCode::ACCEPTED).into_response(),
    };
    Ok(reply)
}

async fn handle_health(service: Arc<ProjectService>) -> Result<impl Reply, Rejection> {
    let state = service.state().snapshot();
    Ok(warp::reply::json(&ApiResponse::ok_with_data(
        "Project builder MCP HTTP server is running",
        serde_json::json!({
            "active_project": state.project_name,
            "version": state.version,
            "subscribers": service.hub().len(),
        }),
    )))
}

/// MCP over `POST /`, `GET /health`, and the subscriber socket on `/ws`.
pub fn routes(service: Arc<ProjectService>, config: &Config) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let mcp = warp::path::end()
        .and(warp::post())
        .and(warp::body::bytes())
        .and(with_service(service.clone()))
        .and_then(handle_mcp);

    let health = warp::path("health")
        .and(warp::get())
        .and(with_service(service.clone()))
        .and_then(handle_health);

    mcp.or(health).or(ws::route(service, config.heartbeat_interval))
}

pub async fn run_server(config: Config) -> Result<()> {
    let runtime = Runtime::start(&config);
    let service = runtime.service().clone();
    let cancel = service.shutdown_token().clone();

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, config.http_port));
    let signal = {
        let cancel = cancel.clone();
        async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::signal::ctrl_c() => info!("interrupted"),
            }
        }
    };
    let (bound, server) = warp::serve(routes(service, &config)).try_bind_with_graceful_shutdown(addr, signal)?;
    info!(addr = %bound, "project builder MCP HTTP server listening");
    server.await;

    runtime.stop().await;
    Ok(())
}
