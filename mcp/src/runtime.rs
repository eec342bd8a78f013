//! Process wiring shared by the stdio and HTTP front ends.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::commands::ProjectService;
use crate::config::Config;
use crate::dev_server::PortProbe;
use crate::{reconcile, watcher, ws};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Logs go to stderr; stdout carries the MCP channel. `RUST_LOG` overrides
/// the default `info` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// A running service and its background tasks.
pub struct Runtime {
    service: Arc<ProjectService>,
    ws_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Builds the service from `config` and starts the marker watcher, the
    /// reconciliation task and the subscriber server.
    pub fn start(config: &Config) -> Self {
        let service = Arc::new(ProjectService::new(config, Arc::new(PortProbe::new(config.dev_server_port))));
        Self::start_with(service, config)
    }

    pub fn start_with(service: Arc<ProjectService>, config: &Config) -> Self {
        let cancel = service.shutdown_token().clone();
        let mut tasks = vec![
            tokio::spawn(watcher::run(service.clone(), config.watch_interval, cancel.clone())),
            tokio::spawn(reconcile::run(service.clone(), config.reconcile_interval, cancel.clone())),
        ];

        let routes = ws::route(service.clone(), config.heartbeat_interval);
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, config.ws_port));
        let signal = async move { cancel.cancelled().await };
        let ws_addr = match warp::serve(routes).try_bind_with_graceful_shutdown(addr, signal) {
            Ok((bound, server)) => {
                info!(addr = %bound, "websocket server listening");
                tasks.push(tokio::spawn(server));
                Some(bound)
            }
            Err(e) => {
                warn!(port = config.ws_port, error = %e, "websocket port unavailable, continuing without subscribers");
                None
            }
        };

        info!(data_dir = %config.data_dir.display(), "project service started");
        Self { service, ws_addr, tasks }
    }

    pub fn service(&self) -> &Arc<ProjectService> {
        &self.service
    }

    pub fn ws_addr(&self) -> Option<SocketAddr> {
        self.ws_addr
    }

    /// Runs the `shutdown` command if nobody has yet and waits briefly for
    /// the background tasks to wind down.
    pub async fn stop(self) {
        if !self.service.shutdown_token().is_cancelled() {
            self.service.shutdown();
        }
        let join = futures::future::join_all(self.tasks);
        if tokio::time::timeout(SHUTDOWN_GRACE, join).await.is_err() {
            warn!("background tasks did not stop in time");
        }
        info!("project service stopped");
    }
}
