//! `FramedSocket`: message boundaries over a byte stream.
//!
//! Each primitive takes an optional per-step timeout. A step that makes no
//! progress within it fails with [`NetError::Timeout`]; a peer that closes
//! part way through a frame yields [`NetError::ShortRead`]; a frame that does
//! not start with a known cookie yields [`NetError::BadMagicCookie`]. The
//! socket never reconnects or resynchronizes on its own.

use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::NetError;
use crate::message::{FrameHeader, MessageRef, COOKIE_SIZE, HEADER64_SIZE};

/// Consecutive zero-progress writes tolerated before giving up.
pub const MAX_WRITE_RETRIES: usize = 100;

/// Largest payload a socket accepts unless told otherwise: 4 GiB, which
/// leaves room for frames that need the 64-bit header.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = (u32::MAX as usize).saturating_add(1);

const PEEK_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Any duplex stream a [`FramedSocket`] can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxStream = Box<dyn AsyncStream>;

pub struct FramedSocket<S> {
    stream: Option<S>,
    /// Reused across reads; grows only when a larger frame arrives.
    recv_buf: Vec<u8>,
    next_seq: i32,
    peer: String,
    max_message_size: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> FramedSocket<S> {
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            recv_buf: Vec::new(),
            next_seq: 0,
            peer: peer.into(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Cap the payload length accepted from the peer. A header claiming more
    /// fails with [`NetError::MessageTooLarge`] before anything is allocated.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Capacity of the receive buffer, for observing reuse.
    pub fn recv_buffer_capacity(&self) -> usize {
        self.recv_buf.capacity()
    }

    /// Erase the stream type.
    pub fn boxed(self) -> FramedSocket<BoxStream>
    where
        S: 'static,
    {
        FramedSocket {
            stream: self.stream.map(|s| Box::new(s) as BoxStream),
            recv_buf: self.recv_buf,
            next_seq: self.next_seq,
            peer: self.peer,
            max_message_size: self.max_message_size,
        }
    }

    // -----------------------------------------------------------------------
    // Writing
    // -----------------------------------------------------------------------

    /// Send one frame, stamping it with this socket's next sequence number.
    pub async fn write_message(
        &mut self,
        id: i64,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), NetError> {
        let seq_no = self.next_seq as i64;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.write_message_with_seq(id, seq_no, payload, timeout).await
    }

    /// Send one frame with an explicit sequence number, e.g. to echo the
    /// request's number in a reply.
    pub async fn write_message_with_seq(
        &mut self,
        id: i64,
        seq_no: i64,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), NetError> {
        let header = FrameHeader::for_payload(id, payload.len(), seq_no);
        self.write_frame(header, payload, timeout).await
    }

    /// Send a frame under a caller-chosen header variant.
    pub async fn write_frame(
        &mut self,
        header: FrameHeader,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), NetError> {
        if header.payload_len()? != payload.len() {
            return Err(NetError::InvalidLength(header.len()));
        }
        let stream = self.stream.as_mut().ok_or(NetError::Closed)?;

        let mut head = Vec::with_capacity(header.encoded_len());
        header.encode(&mut head);
        write_all_retrying(stream, &head, timeout).await?;
        write_all_retrying(stream, payload, timeout).await?;
        with_timeout(timeout, stream.flush()).await?;

        tracing::trace!(peer = %self.peer, id = header.id(), len = payload.len(), "frame sent");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    /// Read one whole frame.
    pub async fn read_message(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<MessageRef<'_>, NetError> {
        self.read_frame(timeout, None).await
    }

    /// Read one frame, pulling the payload in `chunk_size` pieces and calling
    /// `heartbeat` after each piece.
    ///
    /// `timeout` applies to every piece separately, so a slow but steady
    /// sender never trips it.
    pub async fn read_message_with_heartbeat<F>(
        &mut self,
        chunk_size: usize,
        mut heartbeat: F,
        timeout: Option<Duration>,
    ) -> Result<MessageRef<'_>, NetError>
    where
        F: FnMut() + Send,
    {
        let beat: &mut (dyn FnMut() + Send) = &mut heartbeat;
        self.read_frame(timeout, Some((chunk_size, beat))).await
    }

    async fn read_frame(
        &mut self,
        timeout: Option<Duration>,
        heartbeat: Option<(usize, &mut (dyn FnMut() + Send))>,
    ) -> Result<MessageRef<'_>, NetError> {
        let stream = self.stream.as_mut().ok_or(NetError::Closed)?;

        let mut cookie = [0u8; COOKIE_SIZE];
        read_full(stream, &mut cookie, timeout, true).await?;
        let cookie = u64::from_be_bytes(cookie);
        let header_size = FrameHeader::header_size_for_cookie(cookie)?;

        let mut head = [0u8; HEADER64_SIZE];
        read_full(stream, &mut head[..header_size], timeout, false).await?;
        let header = FrameHeader::decode(cookie, &head[..header_size])?;

        let len = header.payload_len()?;
        if len > self.max_message_size {
            return Err(NetError::MessageTooLarge {
                size: len,
                max: self.max_message_size,
            });
        }
        if self.recv_buf.len() < len {
            self.recv_buf
                .try_reserve(len - self.recv_buf.len())
                .map_err(|_| NetError::InvalidLength(header.len()))?;
            self.recv_buf.resize(len, 0);
        }

        let payload = &mut self.recv_buf[..len];
        match heartbeat {
            None => read_full(stream, payload, timeout, false).await?,
            Some((chunk_size, beat)) => {
                for piece in payload.chunks_mut(chunk_size.max(1)) {
                    read_full(stream, piece, timeout, false).await?;
                    beat();
                }
            }
        }

        tracing::trace!(peer = %self.peer, id = header.id(), len, "frame received");
        Ok(MessageRef {
            header,
            payload: &self.recv_buf[..len],
        })
    }

    /// Shut the stream down. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(peer = %self.peer, "shutdown on close failed: {}", e);
            }
        }
    }
}

impl FramedSocket<TcpStream> {
    /// Wrap a connected TCP stream, labelling it with the peer address.
    pub fn from_tcp(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, "set_nodelay failed: {}", e);
        }
        Self::new(stream, peer)
    }

    /// Copy the next `buf.len()` bytes without consuming them.
    pub async fn peek(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, NetError> {
        let stream = self.stream.as_ref().ok_or(NetError::Closed)?;
        match timeout {
            Some(d) => tokio::time::timeout(d, peek_full(stream, buf))
                .await
                .map_err(|_| NetError::Timeout)?,
            None => peek_full(stream, buf).await,
        }
    }
}

impl<S> std::fmt::Debug for FramedSocket<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedSocket")
            .field("peer", &self.peer)
            .field("open", &self.stream.is_some())
            .field("recv_buf", &self.recv_buf.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// I/O helpers
// ---------------------------------------------------------------------------

async fn with_timeout<F, T>(timeout: Option<Duration>, fut: F) -> Result<T, NetError>
where
    F: Future<Output = std::io::Result<T>>,
{
    match timeout {
        Some(d) => match tokio::time::timeout(d, fut).await {
            Ok(res) => res.map_err(NetError::from),
            Err(_) => Err(NetError::Timeout),
        },
        None => fut.await.map_err(NetError::from),
    }
}

/// Fill `buf` completely. EOF before the first byte of a frame
/// (`at_boundary`) is an orderly close; anywhere else it is a short read.
async fn read_full<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut [u8],
    timeout: Option<Duration>,
    at_boundary: bool,
) -> Result<(), NetError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = with_timeout(timeout, stream.read(&mut buf[filled..])).await?;
        if n == 0 {
            if at_boundary && filled == 0 {
                return Err(NetError::ConnectionClosed);
            }
            return Err(NetError::ShortRead {
                expected: buf.len(),
                got: filled,
            });
        }
        filled += n;
    }
    Ok(())
}

async fn write_all_retrying<S: AsyncWrite + Unpin>(
    stream: &mut S,
    buf: &[u8],
    timeout: Option<Duration>,
) -> Result<(), NetError> {
    let mut written = 0;
    let mut stalls = 0;
    while written < buf.len() {
        match with_timeout(timeout, stream.write(&buf[written..])).await {
            Ok(0) => stalls += 1,
            Ok(n) => {
                written += n;
                stalls = 0;
            }
            Err(NetError::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) =>
            {
                stalls += 1
            }
            Err(e) => return Err(e),
        }
        if stalls >= MAX_WRITE_RETRIES {
            return Err(NetError::ShortWrite {
                expected: buf.len(),
                written,
            });
        }
    }
    Ok(())
}

async fn peek_full(stream: &TcpStream, buf: &mut [u8]) -> Result<usize, NetError> {
    let want = buf.len();
    loop {
        let n = stream.peek(buf).await?;
        if n >= want {
            return Ok(n);
        }
        if n == 0 {
            return Err(NetError::ConnectionClosed);
        }
        tokio::time::sleep(PEEK_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MAGIC_COOKIE_32, MAGIC_COOKIE_64};
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    async fn framed_pair() -> (FramedSocket<TcpStream>, FramedSocket<TcpStream>) {
        let (a, b) = tcp_pair().await;
        (FramedSocket::from_tcp(a), FramedSocket::from_tcp(b))
    }

    fn raw_frame(cookie: u64, id: i32, len: i32, payload: &[u8]) -> Vec<u8> {
        let mut buf = cookie.to_be_bytes().to_vec();
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&0i32.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    const SHORT: Option<Duration> = Some(Duration::from_millis(200));

    #[tokio::test]
    async fn test_roundtrip_preserves_id_seq_and_payload() {
        let (mut tx, mut rx) = framed_pair().await;

        tx.write_message(88001, b"first", None).await.unwrap();
        tx.write_message(88002, b"", None).await.unwrap();
        tx.write_message_with_seq(88003, 41, &[7u8; 20_000], None)
            .await
            .unwrap();

        let msg = rx.read_message(SHORT).await.unwrap();
        assert_eq!((msg.id(), msg.seq_no(), msg.payload), (88001, 0, &b"first"[..]));
        assert!(matches!(msg.header, FrameHeader::Header32 { .. }));

        let msg = rx.read_message(SHORT).await.unwrap();
        assert_eq!((msg.id(), msg.seq_no(), msg.payload.len()), (88002, 1, 0));

        let msg = rx.read_message(SHORT).await.unwrap();
        assert_eq!((msg.id(), msg.seq_no()), (88003, 41));
        assert_eq!(msg.payload, &[7u8; 20_000][..]);
    }

    #[tokio::test]
    async fn test_roundtrip_64_bit_header() {
        let (mut tx, mut rx) = framed_pair().await;
        let header = FrameHeader::Header64 {
            id: 5_000_000_000,
            len: 3,
            seq_no: 9,
        };
        tx.write_frame(header, b"abc", None).await.unwrap();
        // Wide ids pick the 64-bit variant on their own.
        tx.write_message(1 << 40, b"wide", None).await.unwrap();

        let msg = rx.read_message(SHORT).await.unwrap();
        assert_eq!(msg.header, header);
        assert_eq!(msg.payload, b"abc");

        let msg = rx.read_message(SHORT).await.unwrap();
        assert_eq!(msg.header.cookie(), MAGIC_COOKIE_64);
        assert_eq!(msg.id(), 1 << 40);
        assert_eq!(msg.payload, b"wide");
    }

    #[tokio::test]
    async fn test_bad_magic_cookie_rejected() {
        let (mut raw, other) = tcp_pair().await;
        let mut rx = FramedSocket::from_tcp(other);

        let mut frame = raw_frame(MAGIC_COOKIE_32, 1, 2, b"hi");
        frame[..8].copy_from_slice(&[0xAB; 8]);
        raw.write_all(&frame).await.unwrap();

        let err = rx.read_message(SHORT).await.unwrap_err();
        assert!(matches!(err, NetError::BadMagicCookie(0xABAB_ABAB_ABAB_ABAB)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_stalled_peer_times_out() {
        let (mut raw, other) = tcp_pair().await;
        let mut rx = FramedSocket::from_tcp(other);

        let frame = raw_frame(MAGIC_COOKIE_32, 1, 100, &[1u8; 10]);
        raw.write_all(&frame).await.unwrap();

        let err = rx
            .read_message(Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "got {err:?}");
        drop(raw);
    }

    #[tokio::test]
    async fn test_peer_close_mid_payload_is_short_read() {
        let (mut raw, other) = tcp_pair().await;
        let mut rx = FramedSocket::from_tcp(other);

        let frame = raw_frame(MAGIC_COOKIE_32, 1, 100, &[1u8; 10]);
        raw.write_all(&frame).await.unwrap();
        drop(raw);

        let err = rx.read_message(SHORT).await.unwrap_err();
        assert!(
            matches!(err, NetError::ShortRead { expected: 100, got: 10 }),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn test_peer_close_between_frames() {
        let (mut tx, mut rx) = framed_pair().await;
        tx.write_message(3, b"last", None).await.unwrap();
        tx.close().await;

        assert_eq!(rx.read_message(SHORT).await.unwrap().payload, b"last");
        let err = rx.read_message(SHORT).await.unwrap_err();
        assert!(matches!(err, NetError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_heartbeat_called_per_chunk() {
        let (mut tx, mut rx) = framed_pair().await;
        let payload: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        tx.write_message(7, &payload, None).await.unwrap();

        let beats = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&beats);
        let msg = rx
            .read_message_with_heartbeat(
                1_000,
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                SHORT,
            )
            .await
            .unwrap();
        assert_eq!(msg.payload, &payload[..]);
        assert_eq!(beats.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_heartbeat_stall_after_first_chunk_times_out() {
        let (mut raw, other) = tcp_pair().await;
        let mut rx = FramedSocket::from_tcp(other);

        // Header promises 3000 bytes; only the first 1000-byte chunk arrives.
        let frame = raw_frame(MAGIC_COOKIE_32, 7, 3_000, &[5u8; 1_000]);
        raw.write_all(&frame).await.unwrap();

        let beats = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&beats);
        let err = rx
            .read_message_with_heartbeat(
                1_000,
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                Some(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::Timeout), "got {err:?}");
        assert_eq!(beats.load(Ordering::SeqCst), 1);
        drop(raw);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_before_allocation() {
        let (mut raw, other) = tcp_pair().await;
        let mut rx = FramedSocket::from_tcp(other).with_max_message_size(1 << 20);

        raw.write_all(&raw_frame(MAGIC_COOKIE_32, 1, 256 << 20, &[]))
            .await
            .unwrap();
        drop(raw);

        let err = rx.read_message(SHORT).await.unwrap_err();
        assert!(
            matches!(err, NetError::MessageTooLarge { size, max } if size == 256 << 20 && max == 1 << 20),
            "got {err:?}"
        );
        assert!(err.is_fatal());
        assert_eq!(rx.recv_buffer_capacity(), 0);
    }

    #[tokio::test]
    async fn test_frame_at_size_cap_is_accepted() {
        let (mut tx, rx) = framed_pair().await;
        let mut rx = rx.with_max_message_size(64);
        tx.write_message(1, &[9u8; 64], None).await.unwrap();
        assert_eq!(rx.read_message(SHORT).await.unwrap().payload.len(), 64);
        assert_eq!(rx.max_message_size(), 64);
        assert_eq!(
            FramedSocket::new(StuckWriter, "x").max_message_size(),
            DEFAULT_MAX_MESSAGE_SIZE
        );
    }

    #[tokio::test]
    async fn test_receive_buffer_is_reused() {
        let (mut tx, mut rx) = framed_pair().await;
        tx.write_message(1, &[0u8; 4096], None).await.unwrap();
        tx.write_message(1, &[1u8; 16], None).await.unwrap();

        rx.read_message(SHORT).await.unwrap();
        let capacity = rx.recv_buffer_capacity();
        assert!(capacity >= 4096);

        let msg = rx.read_message(SHORT).await.unwrap();
        assert_eq!(msg.payload, &[1u8; 16][..]);
        assert_eq!(rx.recv_buffer_capacity(), capacity);
    }

    #[tokio::test]
    async fn test_peek_does_not_consume() {
        let (mut tx, mut rx) = framed_pair().await;
        tx.write_message(11, b"peekaboo", None).await.unwrap();

        let mut cookie = [0u8; 8];
        rx.peek(&mut cookie, SHORT).await.unwrap();
        assert_eq!(u64::from_be_bytes(cookie), MAGIC_COOKIE_32);

        let msg = rx.read_message(SHORT).await.unwrap();
        assert_eq!(msg.payload, b"peekaboo");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut tx, _rx) = framed_pair().await;
        tx.close().await;
        tx.close().await;
        assert!(!tx.is_open());
        let err = tx.write_message(1, b"x", None).await.unwrap_err();
        assert!(matches!(err, NetError::Closed));
    }

    #[tokio::test]
    async fn test_write_frame_rejects_length_mismatch() {
        let (mut tx, _rx) = framed_pair().await;
        let header = FrameHeader::Header32 { id: 1, len: 5, seq_no: 0 };
        let err = tx.write_frame(header, b"abc", None).await.unwrap_err();
        assert!(matches!(err, NetError::InvalidLength(5)));
    }

    /// A writer that never accepts a byte.
    struct StuckWriter;

    impl AsyncRead for StuckWriter {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for StuckWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(0))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_zero_progress_writes_become_short_write() {
        let mut socket = FramedSocket::new(StuckWriter, "stuck");
        let err = socket.write_message(1, b"payload", None).await.unwrap_err();
        assert!(matches!(err, NetError::ShortWrite { written: 0, .. }));
    }
}
