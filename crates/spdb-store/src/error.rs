use std::path::PathBuf;

use spdb_types::ChunkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot open store at {dir}: {reason}")]
    Open { dir: PathBuf, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
