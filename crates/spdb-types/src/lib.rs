//! Core value types shared by every Spdb crate: chunk refs and batches,
//! put/unique modes, product and time summaries.

pub mod chunk;
pub mod mode;
pub mod product;
pub mod time;

pub use chunk::{
    pack_refs, unpack_refs, Chunk, ChunkBatch, ChunkError, ChunkRef, CHUNK_REF_WIRE_SIZE, ZSTD_LEVEL,
};
pub use mode::{Compression, PutMode, UniqueMode};
pub use product::{ProductInfo, TimesInfo};
pub use time::{format_unix, now_unix, parse_unix};
