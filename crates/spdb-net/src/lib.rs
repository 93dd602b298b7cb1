//! Framed-message transport: magic-cookie delimited, length-prefixed frames
//! over TCP, with explicit timeout and short-transfer semantics.

pub mod error;
pub mod message;
pub mod server;
pub mod socket;
pub mod transport;

pub use error::NetError;
pub use message::{FrameHeader, MessageRef, MAGIC_COOKIE_32, MAGIC_COOKIE_64};
pub use server::{FrameServer, MessageHandler, Reply};
pub use socket::{AsyncStream, BoxStream, FramedSocket, DEFAULT_MAX_MESSAGE_SIZE};
pub use transport::{open, Connector, Endpoint, TcpConnector};
