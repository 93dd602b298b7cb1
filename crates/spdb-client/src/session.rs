//! One request/reply exchange with a remote server over a fresh connection.

use std::sync::Arc;
use std::time::Duration;

use spdb_net::{BoxStream, Connector, Endpoint, FramedSocket};
use spdb_proto::{AckReply, EraseRequest, GetReply, GetRequest, PutRequest, Request};
use spdb_serde::{from_wire_bytes, WireDeserialize};

use crate::error::{ClientError, ClientResult};

/// Opens a connection per call, sends one request, reads one reply, closes.
#[derive(Clone)]
pub struct RemoteSession {
    connector: Arc<dyn Connector>,
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
}

impl RemoteSession {
    pub fn new(
        connector: Arc<dyn Connector>,
        connect_timeout: Option<Duration>,
        io_timeout: Option<Duration>,
    ) -> Self {
        Self {
            connector,
            connect_timeout,
            io_timeout,
        }
    }

    pub async fn put(&self, endpoint: &Endpoint, req: PutRequest) -> ClientResult<()> {
        let ack: AckReply = self.communicate(endpoint, &Request::Put(req)).await?;
        check_ack(ack)
    }

    pub async fn get(&self, endpoint: &Endpoint, req: GetRequest) -> ClientResult<GetReply> {
        let reply: GetReply = self.communicate(endpoint, &Request::Get(req)).await?;
        match reply.error {
            Some(msg) => Err(ClientError::Server(msg)),
            None => Ok(reply),
        }
    }

    pub async fn erase(&self, endpoint: &Endpoint, req: EraseRequest) -> ClientResult<()> {
        let ack: AckReply = self.communicate(endpoint, &Request::Erase(req)).await?;
        check_ack(ack)
    }

    /// Send `request` and decode the reply, which must carry the matching
    /// reply id.
    pub async fn communicate<T: WireDeserialize>(
        &self,
        endpoint: &Endpoint,
        request: &Request,
    ) -> ClientResult<T> {
        let payload = request.encode()?;
        let mut socket = self.connector.connect(endpoint, self.connect_timeout).await?;
        let result = exchange(&mut socket, request, &payload, self.io_timeout).await;
        socket.close().await;
        if let Err(e) = &result {
            tracing::debug!(%endpoint, id = request.id(), error = %e, "exchange failed");
        }
        result
    }
}

async fn exchange<T: WireDeserialize>(
    socket: &mut FramedSocket<BoxStream>,
    request: &Request,
    payload: &[u8],
    io_timeout: Option<Duration>,
) -> ClientResult<T> {
    socket.write_message(request.id(), payload, io_timeout).await?;
    let reply = socket.read_message(io_timeout).await?;

    let expected = request.reply_id();
    if reply.id() != expected {
        return Err(ClientError::UnexpectedReply {
            expected,
            actual: reply.id(),
        });
    }
    Ok(from_wire_bytes(reply.payload)?)
}

fn check_ack(ack: AckReply) -> ClientResult<()> {
    match ack.error {
        Some(msg) => Err(ClientError::Server(msg)),
        None => Ok(()),
    }
}
