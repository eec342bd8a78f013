//! Status of the front-end development server that renders project documents.
//!
//! The server itself is managed elsewhere; commands only report whether it is
//! reachable and where.

use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

use serde::Serialize;

const PROBE_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DevServerState {
    Running,
    NotRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DevServerStatus {
    pub state: DevServerState,
    pub url: String,
}

pub trait DevServer: Send + Sync {
    fn status(&self) -> DevServerStatus;
}

/// Considers the dev server running when something accepts connections on
/// its localhost port.
#[derive(Debug, Clone)]
pub struct PortProbe {
    port: u16,
}

impl PortProbe {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl DevServer for PortProbe {
    fn status(&self) -> DevServerStatus {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        let state = match TcpStream::connect_timeout(&addr, PROBE_TIMEOUT) {
            Ok(_) => DevServerState::Running,
            Err(_) => DevServerState::NotRunning,
        };
        DevServerStatus {
            state,
            url: format!("http://localhost:{}", self.port),
        }
    }
}
