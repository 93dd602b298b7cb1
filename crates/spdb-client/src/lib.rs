//! Client access to Spdb stores.
//!
//! [`SpdbClient`] resolves each URL to a local directory, served by an
//! in-process [`spdb_store::Backend`], or to a remote server reached over a
//! framed socket. Remote puts may run on detached workers drawn from a
//! bounded [`PutWorkerPool`].

pub mod client;
pub mod config;
pub mod error;
pub mod put_worker;
pub mod session;
pub mod url;

pub use client::{GetResult, SpdbClient, TimesResult};
pub use config::{timeout_from_ms, ClientConfig, DEFAULT_MAX_THREADS};
pub use error::{ClientError, ClientResult};
pub use put_worker::PutWorkerPool;
pub use session::RemoteSession;
pub use url::{Destination, DsUrlResolver, UrlResolver, DEFAULT_SPDB_PORT, SPDB_PROTOCOL};
