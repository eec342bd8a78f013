use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// How often each process polls the shared marker record. Bounds worst-case
/// cross-process propagation latency.
pub const WATCH_INTERVAL: Duration = Duration::from_millis(500);

/// How often the active project is re-read from disk to absorb edits made
/// outside the server.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// Per-subscriber liveness probe period.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub const DEFAULT_WS_PORT: u16 = 8080;
pub const DEFAULT_HTTP_PORT: u16 = 8090;
pub const DEFAULT_DEV_SERVER_PORT: u16 = 3000;

const DATA_DIR_VAR: &str = "PROJECT_BUILDER_DATA_DIR";
const WS_PORT_VAR: &str = "PROJECT_BUILDER_WS_PORT";
const HTTP_PORT_VAR: &str = "PROJECT_BUILDER_HTTP_PORT";
const DEV_SERVER_PORT_VAR: &str = "PROJECT_BUILDER_DEV_SERVER_PORT";

#[derive(Debug, Clone)]
pub struct Config {
    /// Root holding `projects/`, the registry and the marker record.
    pub data_dir: PathBuf,
    pub ws_port: u16,
    pub http_port: u16,
    pub dev_server_port: u16,
    pub watch_interval: Duration,
    pub reconcile_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            ws_port: DEFAULT_WS_PORT,
            http_port: DEFAULT_HTTP_PORT,
            dev_server_port: DEFAULT_DEV_SERVER_PORT,
            watch_interval: WATCH_INTERVAL,
            reconcile_interval: RECONCILE_INTERVAL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

impl Config {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(dir) = lookup(DATA_DIR_VAR).filter(|d| !d.is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(port) = parse_port(WS_PORT_VAR, lookup(WS_PORT_VAR))? {
            config.ws_port = port;
        }
        if let Some(port) = parse_port(HTTP_PORT_VAR, lookup(HTTP_PORT_VAR))? {
            config.http_port = port;
        }
        if let Some(port) = parse_port(DEV_SERVER_PORT_VAR, lookup(DEV_SERVER_PORT_VAR))? {
            config.dev_server_port = port;
        }
        Ok(config)
    }

    /// Config rooted at `data_dir` with the default ports and intervals.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }
}

fn parse_port(var: &'static str, value: Option<String>) -> Result<Option<u16>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<u16>()
        .map(Some)
        .map_err(|e| ConfigError::Invalid {
            var,
            value,
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_overrides() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.ws_port, DEFAULT_WS_PORT);
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.watch_interval, Duration::from_millis(500));
    }

    #[test]
    fn overrides_are_read() {
        let config = Config::from_lookup(|var| match var {
            "PROJECT_BUILDER_WS_PORT" => Some("9001".into()),
            "PROJECT_BUILDER_DATA_DIR" => Some("/tmp/pb".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.ws_port, 9001);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/pb"));
    }

    #[test]
    fn bad_port_is_an_error() {
        let err = Config::from_lookup(|var| (var == "PROJECT_BUILDER_HTTP_PORT").then(|| "http".to_string()));
        assert!(matches!(err, Err(ConfigError::Invalid { var: "PROJECT_BUILDER_HTTP_PORT", .. })));
    }
}
