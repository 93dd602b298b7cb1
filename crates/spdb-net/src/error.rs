use thiserror::Error;

/// Errors raised by the framed transport.
#[derive(Debug, Error)]
pub enum NetError {
    /// Host name could not be resolved to any address.
    #[error("unknown host: {0}")]
    UnknownHost(String),

    /// Every resolved address refused or failed the connect.
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// No progress within the caller's deadline. The peer may still be alive.
    #[error("timeout")]
    Timeout,

    /// The first 8 bytes of a frame matched neither known cookie.
    #[error("bad magic cookie: {0:#018x}")]
    BadMagicCookie(u64),

    /// The peer closed the stream part way through a frame.
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    /// The write retry budget ran out before the frame was fully sent.
    #[error("short write: expected {expected} bytes, wrote {written}")]
    ShortWrite { expected: usize, written: usize },

    /// Orderly close by the peer between frames.
    #[error("connection closed")]
    ConnectionClosed,

    /// Header length is negative, does not fit in memory, or disagrees with
    /// the payload handed to a write.
    #[error("invalid frame length: {0}")]
    InvalidLength(i64),

    /// Header length is above the receiver's size cap.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Operation on a socket that was already closed locally.
    #[error("socket closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, NetError::Timeout)
    }

    /// Whether the connection must be closed and reopened after this error.
    ///
    /// Timeouts are recoverable; everything that leaves the stream in an
    /// unknown position is not.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, NetError::Timeout | NetError::UnknownHost(_))
    }
}
