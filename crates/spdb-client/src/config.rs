//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use spdb_types::{Compression, PutMode, UniqueMode};

/// Default upper bound on live async put workers.
pub const DEFAULT_MAX_THREADS: usize = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Run remote puts on detached workers.
    pub put_threading: bool,

    /// Ceiling on live put workers.
    pub max_threads: usize,

    pub put_mode: PutMode,

    /// Unique filter applied to every get.
    pub unique: UniqueMode,

    /// Ask for chunk refs without payloads.
    pub refs_only: bool,

    /// Compression of chunk data sent to and asked from remote servers.
    pub compression: Compression,

    /// Destinations for [`crate::SpdbClient::put_all`].
    pub urls: Vec<String>,

    /// Name used in log lines.
    pub app_name: String,

    /// Milliseconds; negative blocks.
    pub connect_timeout_ms: i64,

    /// Milliseconds per read/write step; negative blocks.
    pub io_timeout_ms: i64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            put_threading: true,
            max_threads: DEFAULT_MAX_THREADS,
            put_mode: PutMode::Overwrite,
            unique: UniqueMode::Off,
            refs_only: false,
            compression: Compression::None,
            urls: Vec::new(),
            app_name: "spdb-client".to_string(),
            connect_timeout_ms: 10_000,
            io_timeout_ms: 60_000,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        timeout_from_ms(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        timeout_from_ms(self.io_timeout_ms)
    }
}

/// `-1` (any negative value) means no timeout.
pub fn timeout_from_ms(ms: i64) -> Option<Duration> {
    u64::try_from(ms).ok().map(Duration::from_millis)
}
