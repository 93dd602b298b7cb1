//! Local storage capability: the [`Backend`] and [`StoreHandle`] traits, an
//! in-memory engine, and helpers that run puts and queries against a handle.

mod backend;
mod error;
mod exec;
mod mem;

pub use backend::{Backend, StoreHandle};
pub use error::{StoreError, StoreResult};
pub use exec::{run_put, run_query, QueryOutput};
pub use mem::{MemBackend, MemHandle};
