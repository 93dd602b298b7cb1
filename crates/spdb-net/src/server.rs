use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::error::NetError;
use crate::socket::{FramedSocket, DEFAULT_MAX_MESSAGE_SIZE};

/// A reply frame produced by a [`MessageHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub id: i64,
    pub payload: Vec<u8>,
}

impl Reply {
    pub fn new(id: i64, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }
}

/// Turns one request frame into one reply frame.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, id: i64, payload: &[u8]) -> Reply;
}

/// Accepts TCP connections and answers every frame read from them with the
/// handler's reply, echoing the request's sequence number.
///
/// A connection stays open until the peer closes it, it sits idle for longer
/// than `idle_timeout`, or the server is stopped. A frame larger than
/// `max_message_size` closes the connection without being read.
pub struct FrameServer {
    handler: Arc<dyn MessageHandler>,
    shutdown: watch::Sender<bool>,
    limits: ConnectionLimits,
    local_addr: Option<SocketAddr>,
}

/// Per-connection settings handed to every accepted socket.
#[derive(Debug, Clone, Copy)]
struct ConnectionLimits {
    idle_timeout: Option<Duration>,
    max_message_size: usize,
}

impl FrameServer {
    pub fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            handler,
            shutdown: watch::channel(false).0,
            limits: ConnectionLimits {
                idle_timeout: None,
                max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            },
            local_addr: None,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.limits.idle_timeout = idle_timeout;
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.limits.max_message_size = max_message_size;
        self
    }

    /// Bind and spawn the accept loop. Returns the bound address.
    pub async fn start<A: ToSocketAddrs>(&mut self, addr: A) -> Result<SocketAddr, NetError> {
        if let Some(addr) = self.local_addr {
            tracing::warn!(%addr, "server already running, ignoring duplicate start");
            return Ok(addr);
        }

        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        self.local_addr = Some(addr);
        tracing::info!(%addr, "frame server listening");

        let handler = Arc::clone(&self.handler);
        let shutdown = self.shutdown.subscribe();
        let limits = self.limits;
        tokio::spawn(async move {
            Self::accept_loop(listener, handler, shutdown, limits).await;
            tracing::info!(%addr, "frame server accept loop exited");
        });
        Ok(addr)
    }

    /// Signal the accept loop and every live connection to stop.
    pub fn stop(&mut self) {
        if self.local_addr.take().is_some() {
            tracing::info!("frame server stopping");
            self.shutdown.send_replace(true);
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.local_addr.is_some()
    }

    // -----------------------------------------------------------------------
    // Internal implementation
    // -----------------------------------------------------------------------

    async fn accept_loop(
        listener: TcpListener,
        handler: Arc<dyn MessageHandler>,
        mut shutdown: watch::Receiver<bool>,
        limits: ConnectionLimits,
    ) {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    tracing::info!("frame server shutdown signal received");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let handler = Arc::clone(&handler);
                            let shutdown = shutdown.clone();
                            tasks.spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, handler, shutdown, limits).await {
                                    tracing::debug!("connection handler finished: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        tasks.shutdown().await;
    }

    async fn handle_connection(
        stream: TcpStream,
        handler: Arc<dyn MessageHandler>,
        mut shutdown: watch::Receiver<bool>,
        limits: ConnectionLimits,
    ) -> Result<(), NetError> {
        let idle_timeout = limits.idle_timeout;
        let mut socket =
            FramedSocket::from_tcp(stream).with_max_message_size(limits.max_message_size);
        tracing::debug!(peer = %socket.peer(), "new connection");

        loop {
            let reply = {
                let msg = tokio::select! {
                    biased;

                    _ = shutdown.changed() => {
                        tracing::debug!("connection shutdown");
                        break;
                    }

                    result = socket.read_message(idle_timeout) => result,
                };

                let msg = match msg {
                    Ok(msg) => msg,
                    Err(NetError::ConnectionClosed) => break,
                    Err(NetError::Timeout) => {
                        tracing::debug!("idle connection timed out");
                        break;
                    }
                    Err(e) => return Err(e),
                };

                let seq_no = msg.seq_no();
                tracing::debug!(id = msg.id(), len = msg.payload.len(), "dispatching request");
                (handler.handle(msg.id(), msg.payload).await, seq_no)
            };

            let (reply, seq_no) = reply;
            socket
                .write_message_with_seq(reply.id, seq_no, &reply.payload, idle_timeout)
                .await?;
        }

        socket.close().await;
        Ok(())
    }
}

impl Drop for FrameServer {
    fn drop(&mut self) {
        self.stop();
    }
}
