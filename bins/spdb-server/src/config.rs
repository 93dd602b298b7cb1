//! Server configuration, loaded from TOML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spdb_client::{timeout_from_ms, DEFAULT_SPDB_PORT};
use spdb_logging::LogConfig;

/// Default cap on one request frame's payload.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1 << 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_host: String,
    pub port: u16,
    /// Close a connection after this many idle milliseconds; negative never.
    pub idle_timeout_ms: i64,
    /// Requests claiming a larger payload are dropped with their connection.
    pub max_message_bytes: usize,
    pub log: LogConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            port: DEFAULT_SPDB_PORT,
            idle_timeout_ms: 300_000,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            log: LogConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
        Ok(toml::from_str(&text)?)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        timeout_from_ms(self.idle_timeout_ms)
    }
}
