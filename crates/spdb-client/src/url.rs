//! URL resolution.
//!
//! A URL is either a plain directory path, used directly through the local
//! backend, or `spdbp:://host[:port]::dir`, served by a remote Spdb server.
//! An empty host in the second form also means local.

use std::path::PathBuf;

use spdb_net::Endpoint;

use crate::error::{ClientError, ClientResult};

pub const SPDB_PROTOCOL: &str = "spdbp";
pub const DEFAULT_SPDB_PORT: u16 = 5440;

/// Where a URL's store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Local { dir: PathBuf },
    Remote { endpoint: Endpoint, dir: String },
}

impl Destination {
    pub fn is_local(&self) -> bool {
        matches!(self, Destination::Local { .. })
    }
}

pub trait UrlResolver: Send + Sync + 'static {
    fn resolve(&self, url: &str) -> ClientResult<Destination>;
}

/// Parses `spdbp:://host:port::dir` URLs. Hosts are not looked up here.
#[derive(Debug, Clone)]
pub struct DsUrlResolver {
    default_port: u16,
}

impl Default for DsUrlResolver {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_SPDB_PORT,
        }
    }
}

impl DsUrlResolver {
    pub fn with_default_port(default_port: u16) -> Self {
        Self { default_port }
    }
}

impl UrlResolver for DsUrlResolver {
    fn resolve(&self, url: &str) -> ClientResult<Destination> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ClientError::invalid_url(url, "empty"));
        }

        let Some((protocol, rest)) = url.split_once(":://") else {
            return Ok(Destination::Local {
                dir: PathBuf::from(url),
            });
        };

        if protocol != SPDB_PROTOCOL {
            return Err(ClientError::invalid_url(
                url,
                format!("unsupported protocol {protocol:?}"),
            ));
        }

        let (host_port, dir) = rest
            .split_once("::")
            .ok_or_else(|| ClientError::invalid_url(url, "missing '::' before directory"))?;
        if dir.is_empty() {
            return Err(ClientError::invalid_url(url, "missing directory"));
        }

        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ClientError::invalid_url(url, format!("bad port {port:?}")))?;
                (host, port)
            }
            None => (host_port, self.default_port),
        };

        if host.is_empty() {
            return Ok(Destination::Local {
                dir: PathBuf::from(dir),
            });
        }

        Ok(Destination::Remote {
            endpoint: Endpoint::new(host, port),
            dir: dir.to_string(),
        })
    }
}
