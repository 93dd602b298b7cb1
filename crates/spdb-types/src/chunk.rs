//! Chunk references and the packed chunk batch.
//!
//! A [`ChunkBatch`] is the unit exchanged between producers, the store and
//! consumers: an ordered array of [`ChunkRef`] plus one contiguous data
//! buffer holding all payloads back to back. Offsets in each ref are relative
//! to the start of that buffer, never absolute file positions.

use std::io::Read;

use serde::{Deserialize, Serialize};
use spdb_serde::{read_byte_buf, write_byte_buf, WireDeserialize, WireError, WireSerialize};
use thiserror::Error;

use crate::mode::{Compression, UniqueMode};

/// Encoded size of one [`ChunkRef`] on the wire.
pub const CHUNK_REF_WIRE_SIZE: usize = 4 + 4 + 8 + 8 + 4 + 4;

/// zstd level used for compressed transfers.
pub const ZSTD_LEVEL: i32 = 3;

/// Errors raised while building or validating a chunk batch.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk {index}: offset {offset} + len {len} exceeds data buffer of {data_len} bytes")]
    OutOfBounds {
        index: usize,
        offset: i32,
        len: i32,
        data_len: usize,
    },

    #[error("chunk {index}: overlaps previous chunk (offset {offset} < previous end {prev_end})")]
    Overlap {
        index: usize,
        offset: i32,
        prev_end: i64,
    },

    #[error("chunk {index}: negative length or offset")]
    Negative { index: usize },

    #[error("data buffer would exceed {max} bytes")]
    BufferFull { max: usize },

    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

/// Metadata for one stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRef {
    /// Application-defined sub-key. Not unique.
    pub data_type: i32,
    /// Second application-defined sub-key, e.g. a forecast lead time.
    pub data_type2: i32,
    /// Unix seconds the chunk is valid for.
    pub valid_time: i64,
    /// Unix seconds after which the chunk is stale.
    pub expire_time: i64,
    /// Payload length in bytes.
    pub len: i32,
    /// Payload offset relative to the start of the batch data buffer.
    pub offset: i32,
}

impl ChunkRef {
    /// Whether the pair selects this chunk. Each key is matched on its own
    /// and `0` matches every value of that key.
    pub fn matches_types(&self, data_type: i32, data_type2: i32) -> bool {
        (data_type == 0 || self.data_type == data_type)
            && (data_type2 == 0 || self.data_type2 == data_type2)
    }

    /// Whether the validity window `[valid_time, expire_time)` covers `t`.
    pub fn is_valid_at(&self, t: i64) -> bool {
        self.valid_time <= t && t < self.expire_time
    }

    fn end(&self) -> i64 {
        self.offset as i64 + self.len as i64
    }
}

impl WireSerialize for ChunkRef {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        self.data_type.wire_serialize(buf)?;
        self.data_type2.wire_serialize(buf)?;
        self.valid_time.wire_serialize(buf)?;
        self.expire_time.wire_serialize(buf)?;
        self.len.wire_serialize(buf)?;
        self.offset.wire_serialize(buf)
    }
}

impl WireDeserialize for ChunkRef {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        Ok(Self {
            data_type: i32::wire_deserialize(buf, offset)?,
            data_type2: i32::wire_deserialize(buf, offset)?,
            valid_time: i64::wire_deserialize(buf, offset)?,
            expire_time: i64::wire_deserialize(buf, offset)?,
            len: i32::wire_deserialize(buf, offset)?,
            offset: i32::wire_deserialize(buf, offset)?,
        })
    }
}

/// A borrowed view of one chunk inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub data_type: i32,
    pub data_type2: i32,
    pub valid_time: i64,
    pub expire_time: i64,
    /// Empty when the batch carries refs only.
    pub data: &'a [u8],
}

/// Ordered chunk refs plus their packed payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkBatch {
    refs: Vec<ChunkRef>,
    data: Vec<u8>,
    refs_only: bool,
}

impl ChunkBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a batch from a ref array and its data buffer, checking the
    /// offset invariant.
    pub fn from_parts(refs: Vec<ChunkRef>, data: Vec<u8>) -> Result<Self, ChunkError> {
        validate_refs(&refs, Some(data.len()))?;
        Ok(Self {
            refs,
            data,
            refs_only: false,
        })
    }

    /// Build a batch that carries refs but no payload bytes.
    pub fn refs_only(refs: Vec<ChunkRef>) -> Result<Self, ChunkError> {
        validate_refs(&refs, None)?;
        Ok(Self {
            refs,
            data: Vec::new(),
            refs_only: true,
        })
    }

    /// Append one chunk with `data_type2` 0, packing its payload at the end
    /// of the data buffer.
    pub fn add_chunk(
        &mut self,
        data_type: i32,
        valid_time: i64,
        expire_time: i64,
        payload: &[u8],
    ) -> Result<ChunkRef, ChunkError> {
        self.add_chunk_with_type2(data_type, 0, valid_time, expire_time, payload)
    }

    /// Append one chunk keyed by both data types.
    pub fn add_chunk_with_type2(
        &mut self,
        data_type: i32,
        data_type2: i32,
        valid_time: i64,
        expire_time: i64,
        payload: &[u8],
    ) -> Result<ChunkRef, ChunkError> {
        let offset = self.next_offset();
        let end = offset as usize + payload.len();
        if end > i32::MAX as usize {
            return Err(ChunkError::BufferFull {
                max: i32::MAX as usize,
            });
        }

        let chunk_ref = ChunkRef {
            data_type,
            data_type2,
            valid_time,
            expire_time,
            len: payload.len() as i32,
            offset,
        };
        if !self.refs_only {
            self.data.extend_from_slice(payload);
        }
        self.refs.push(chunk_ref);
        Ok(chunk_ref)
    }

    /// Append every chunk of `other`, re-basing its offsets.
    pub fn extend_from(&mut self, other: &ChunkBatch) -> Result<(), ChunkError> {
        for (r, chunk) in other.refs.iter().zip(other.iter()) {
            self.add_chunk_with_type2(
                r.data_type,
                r.data_type2,
                r.valid_time,
                r.expire_time,
                chunk.data,
            )?;
            if other.refs_only {
                // Keep the advertised length even though no bytes travelled.
                if let Some(last) = self.refs.last_mut() {
                    last.len = r.len;
                }
            }
        }
        Ok(())
    }

    /// Empty the batch, leaving it as [`ChunkBatch::new`] would.
    pub fn clear(&mut self) {
        self.refs.clear();
        self.data.clear();
        self.refs_only = false;
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn is_refs_only(&self) -> bool {
        self.refs_only
    }

    pub fn refs(&self) -> &[ChunkRef] {
        &self.refs
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload bytes of chunk `index`, or `None` when out of range.
    pub fn chunk_data(&self, index: usize) -> Option<&[u8]> {
        let r = self.refs.get(index)?;
        if self.refs_only {
            return Some(&[]);
        }
        let start = r.offset as usize;
        self.data.get(start..start + r.len as usize)
    }

    pub fn get(&self, index: usize) -> Option<Chunk<'_>> {
        let r = self.refs.get(index)?;
        Some(Chunk {
            data_type: r.data_type,
            data_type2: r.data_type2,
            valid_time: r.valid_time,
            expire_time: r.expire_time,
            data: self.chunk_data(index)?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Chunk<'_>> + '_ {
        (0..self.refs.len()).filter_map(move |i| self.get(i))
    }

    /// Split into the ref array and the data buffer.
    pub fn into_parts(self) -> (Vec<ChunkRef>, Vec<u8>) {
        (self.refs, self.data)
    }

    /// Drop payload bytes, keeping only refs.
    pub fn into_refs_only(self) -> ChunkBatch {
        ChunkBatch {
            refs: self.refs,
            data: Vec::new(),
            refs_only: true,
        }
    }

    /// Keep one chunk per non-zero data type.
    ///
    /// The batch is assumed to be in chronological order, which every fetch
    /// mode produces. `Latest` keeps the last chunk of each type, `Earliest`
    /// the first. Chunks with data type 0 are always kept. Offsets are
    /// re-packed so the result is a well-formed batch.
    pub fn make_unique(&self, mode: UniqueMode) -> Result<ChunkBatch, ChunkError> {
        let keep: Vec<bool> = match mode {
            UniqueMode::Off => return Ok(self.clone()),
            UniqueMode::Latest => self
                .refs
                .iter()
                .enumerate()
                .map(|(i, r)| {
                    r.data_type == 0
                        || !self.refs[i + 1..].iter().any(|o| o.data_type == r.data_type)
                })
                .collect(),
            UniqueMode::Earliest => self
                .refs
                .iter()
                .enumerate()
                .map(|(i, r)| {
                    r.data_type == 0 || !self.refs[..i].iter().any(|o| o.data_type == r.data_type)
                })
                .collect(),
        };

        let mut out = ChunkBatch {
            refs_only: self.refs_only,
            ..ChunkBatch::default()
        };
        for (i, r) in self.refs.iter().enumerate() {
            if !keep[i] {
                continue;
            }
            let payload = self.chunk_data(i).unwrap_or(&[]);
            out.add_chunk_with_type2(
                r.data_type,
                r.data_type2,
                r.valid_time,
                r.expire_time,
                payload,
            )?;
            if self.refs_only {
                if let Some(last) = out.refs.last_mut() {
                    last.len = r.len;
                }
            }
        }
        Ok(out)
    }

    fn next_offset(&self) -> i32 {
        self.refs
            .last()
            .map(|r| (r.offset as i64 + r.len as i64) as i32)
            .unwrap_or(0)
    }
}

/// Check offsets are non-negative, non-overlapping, monotonic and (when the
/// data length is known) inside the buffer.
fn validate_refs(refs: &[ChunkRef], data_len: Option<usize>) -> Result<(), ChunkError> {
    let mut prev_end = 0i64;
    for (index, r) in refs.iter().enumerate() {
        if r.offset < 0 || r.len < 0 {
            return Err(ChunkError::Negative { index });
        }
        if (r.offset as i64) < prev_end {
            return Err(ChunkError::Overlap {
                index,
                offset: r.offset,
                prev_end,
            });
        }
        if let Some(data_len) = data_len {
            if r.end() > data_len as i64 {
                return Err(ChunkError::OutOfBounds {
                    index,
                    offset: r.offset,
                    len: r.len,
                    data_len,
                });
            }
        }
        prev_end = r.end();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ChunkCodec: wire form of a batch
// ---------------------------------------------------------------------------

/// Pack a ref array as `u32 count` followed by `count` fixed-size refs.
pub fn pack_refs(refs: &[ChunkRef]) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::with_capacity(4 + refs.len() * CHUNK_REF_WIRE_SIZE);
    (refs.len() as u32).wire_serialize(&mut buf)?;
    for r in refs {
        r.wire_serialize(&mut buf)?;
    }
    Ok(buf)
}

/// Inverse of [`pack_refs`].
pub fn unpack_refs(buf: &[u8]) -> Result<Vec<ChunkRef>, WireError> {
    spdb_serde::from_wire_bytes(buf)
}

impl ChunkBatch {
    /// Encode the batch with its data buffer packed by `compression`.
    ///
    /// The flag and the ref array are never compressed. A compressed buffer
    /// is preceded by its raw length.
    pub fn encode_with(
        &self,
        compression: Compression,
        buf: &mut Vec<u8>,
    ) -> Result<(), WireError> {
        self.refs_only.wire_serialize(buf)?;
        self.refs.wire_serialize(buf)?;
        match compression {
            Compression::None => write_byte_buf(&self.data, buf),
            Compression::Zstd => {
                let raw_len = u32::try_from(self.data.len())
                    .map_err(|_| WireError::DataTooLarge { size: self.data.len() })?;
                let packed = zstd::encode_all(self.data.as_slice(), ZSTD_LEVEL)
                    .map_err(|e| WireError::Invalid(format!("zstd compress failed: {e}")))?;
                raw_len.wire_serialize(buf)?;
                write_byte_buf(&packed, buf)
            }
        }
    }

    /// Inverse of [`ChunkBatch::encode_with`].
    pub fn decode_with(
        buf: &[u8],
        offset: &mut usize,
        compression: Compression,
    ) -> Result<Self, WireError> {
        let refs_only = bool::wire_deserialize(buf, offset)?;
        let refs = Vec::<ChunkRef>::wire_deserialize(buf, offset)?;
        let data = match compression {
            Compression::None => read_byte_buf(buf, offset)?.to_vec(),
            Compression::Zstd => {
                let raw_len = u32::wire_deserialize(buf, offset)? as usize;
                unpack_zstd(read_byte_buf(buf, offset)?, raw_len)?
            }
        };
        let batch = if refs_only {
            ChunkBatch::refs_only(refs)
        } else {
            ChunkBatch::from_parts(refs, data)
        };
        batch.map_err(|e| WireError::Invalid(e.to_string()))
    }
}

/// Inflate at most `raw_len` bytes; the output grows with what the stream
/// actually yields, not with the advertised length.
fn unpack_zstd(packed: &[u8], raw_len: usize) -> Result<Vec<u8>, WireError> {
    let decoder = zstd::stream::read::Decoder::new(packed)
        .map_err(|e| WireError::Invalid(format!("zstd decompress failed: {e}")))?;
    let mut data = Vec::new();
    decoder
        .take(raw_len as u64 + 1)
        .read_to_end(&mut data)
        .map_err(|e| WireError::Invalid(format!("zstd decompress failed: {e}")))?;
    if data.len() != raw_len {
        return Err(WireError::Invalid(format!(
            "decompressed {} bytes, header says {raw_len}",
            data.len()
        )));
    }
    Ok(data)
}

impl WireSerialize for ChunkBatch {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        self.encode_with(Compression::None, buf)
    }
}

impl WireDeserialize for ChunkBatch {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        Self::decode_with(buf, offset, Compression::None)
    }
}
