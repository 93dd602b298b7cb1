//! Client error types.

use spdb_net::NetError;
use spdb_proto::ProtoError;
use spdb_serde::WireError;
use spdb_store::StoreError;
use spdb_types::ChunkError;

/// Errors that can occur during client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connection, framing or timeout failure.
    #[error("network error: {0}")]
    Net(#[from] NetError),

    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Admission control: the worker pool is at its ceiling.
    #[error("too many put workers: {live} live, limit {max}")]
    TooManyThreads { live: usize, max: usize },

    /// The server answered with a frame of the wrong kind.
    #[error("unexpected reply id {actual}, expected {expected}")]
    UnexpectedReply { expected: i64, actual: i64 },

    /// The server reported an application error.
    #[error("server error: {0}")]
    Server(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),

    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),

    /// A synchronous put did not complete. Connection failures, protocol
    /// mismatches and server-side errors all surface as this one variant.
    #[error("put to {url} failed: {reason}")]
    Put { url: String, reason: String },

    /// At least one destination of a multi-destination put failed.
    #[error("put failed for {failed} of {total} destinations")]
    PutFailed { failed: usize, total: usize },

    #[error("no destination urls configured")]
    NoUrls,
}

impl From<WireError> for ClientError {
    fn from(err: WireError) -> Self {
        ClientError::Proto(ProtoError::Wire(err))
    }
}

impl ClientError {
    pub fn invalid_url(url: &str, reason: impl Into<String>) -> Self {
        ClientError::InvalidUrl {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn put_failed(url: &str, cause: &ClientError) -> Self {
        ClientError::Put {
            url: url.to_string(),
            reason: cause.to_string(),
        }
    }
}

/// Convenience result type.
pub type ClientResult<T> = std::result::Result<T, ClientError>;
