use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::NetError;
use crate::socket::{BoxStream, FramedSocket};

/// A remote `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Resolve `host` and connect to the first address that accepts.
///
/// `timeout` bounds resolution and each connect attempt; `None` blocks.
pub async fn open(
    host: &str,
    port: u16,
    timeout: Option<Duration>,
) -> Result<FramedSocket<TcpStream>, NetError> {
    let lookup = tokio::net::lookup_host((host, port));
    let addrs: Vec<_> = match timeout {
        Some(d) => tokio::time::timeout(d, lookup)
            .await
            .map_err(|_| NetError::Timeout)?,
        None => lookup.await,
    }
    .map_err(|e| NetError::UnknownHost(format!("{host}: {e}")))?
    .collect();

    if addrs.is_empty() {
        return Err(NetError::UnknownHost(host.to_string()));
    }

    let mut last_err = None;
    for addr in addrs {
        tracing::debug!(%addr, "connecting");
        let attempt = TcpStream::connect(addr);
        let result = match timeout {
            Some(d) => match tokio::time::timeout(d, attempt).await {
                Ok(r) => r,
                Err(_) => return Err(NetError::Timeout),
            },
            None => attempt.await,
        };
        match result {
            Ok(stream) => return Ok(FramedSocket::from_tcp(stream)),
            Err(e) => last_err = Some((addr, e)),
        }
    }

    match last_err {
        Some((addr, source)) => Err(NetError::ConnectFailed {
            addr: addr.to_string(),
            source,
        }),
        None => Err(NetError::UnknownHost(host.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Establishes framed connections. Connection policy (pooling, retry) lives
/// in implementations of this trait, never in [`FramedSocket`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Option<Duration>,
    ) -> Result<FramedSocket<BoxStream>, NetError>;
}

/// Opens a fresh TCP connection per call.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Option<Duration>,
    ) -> Result<FramedSocket<BoxStream>, NetError> {
        let socket = open(&endpoint.host, endpoint.port, timeout).await?;
        Ok(socket.boxed())
    }
}
