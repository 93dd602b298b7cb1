//! Request and reply bodies carried inside framed messages.
//!
//! Each request travels as one frame whose id names its kind; the server
//! answers with exactly one frame carrying the matching reply id. Every reply
//! has an `error` slot for server-side failures.

use spdb_serde::{from_wire_bytes, to_wire_bytes, WireDeserialize, WireError, WireSerialize};
use spdb_types::{ChunkBatch, Compression, ProductInfo, PutMode, TimesInfo, UniqueMode};
use thiserror::Error;

pub mod ids {
    pub const PUT_REQUEST: i64 = 88001;
    pub const GET_REQUEST: i64 = 88002;
    pub const ERASE_REQUEST: i64 = 88003;
    pub const PUT_REPLY: i64 = 88101;
    pub const GET_REPLY: i64 = 88102;
    pub const ERASE_REPLY: i64 = 88103;

    /// Reply id expected for a request id.
    pub fn reply_for(request: i64) -> Option<i64> {
        match request {
            PUT_REQUEST => Some(PUT_REPLY),
            GET_REQUEST => Some(GET_REPLY),
            ERASE_REQUEST => Some(ERASE_REPLY),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("unknown message id {0}")]
    UnknownMessage(i64),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    /// Store directory on the server.
    pub dir: String,
    pub product: ProductInfo,
    pub mode: PutMode,
    /// How the batch data buffer is packed on the wire.
    pub compression: Compression,
    pub batch: ChunkBatch,
}

/// Which chunks a get selects. Margins and times are unix seconds; a data
/// type of 0 matches every value of that key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetQuery {
    Exact { time: i64, data_type: i32, data_type2: i32 },
    Closest { time: i64, margin: i64, data_type: i32, data_type2: i32 },
    Interval { start: i64, end: i64, data_type: i32, data_type2: i32 },
    Valid { time: i64, data_type: i32, data_type2: i32 },
    Latest { margin: i64, data_type: i32, data_type2: i32 },
    FirstBefore { time: i64, margin: i64, data_type: i32, data_type2: i32 },
    FirstAfter { time: i64, margin: i64, data_type: i32, data_type2: i32 },
    Times,
    TimeList { start: i64, end: i64, min_interval: i64 },
}

impl GetQuery {
    pub fn name(&self) -> &'static str {
        match self {
            GetQuery::Exact { .. } => "exact",
            GetQuery::Closest { .. } => "closest",
            GetQuery::Interval { .. } => "interval",
            GetQuery::Valid { .. } => "valid",
            GetQuery::Latest { .. } => "latest",
            GetQuery::FirstBefore { .. } => "first_before",
            GetQuery::FirstAfter { .. } => "first_after",
            GetQuery::Times => "times",
            GetQuery::TimeList { .. } => "time_list",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRequest {
    pub dir: String,
    pub query: GetQuery,
    pub unique: UniqueMode,
    pub refs_only: bool,
    /// Packing the server should use for the reply's data buffer.
    pub compression: Compression,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EraseRequest {
    pub dir: String,
    pub valid_time: i64,
    /// 0 erases every type at `valid_time`.
    pub data_type: i32,
    pub data_type2: i32,
}

/// Any request a server accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Put(PutRequest),
    Get(GetRequest),
    Erase(EraseRequest),
}

impl Request {
    pub fn id(&self) -> i64 {
        match self {
            Request::Put(_) => ids::PUT_REQUEST,
            Request::Get(_) => ids::GET_REQUEST,
            Request::Erase(_) => ids::ERASE_REQUEST,
        }
    }

    pub fn reply_id(&self) -> i64 {
        match self {
            Request::Put(_) => ids::PUT_REPLY,
            Request::Get(_) => ids::GET_REPLY,
            Request::Erase(_) => ids::ERASE_REPLY,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        let bytes = match self {
            Request::Put(r) => to_wire_bytes(r)?,
            Request::Get(r) => to_wire_bytes(r)?,
            Request::Erase(r) => to_wire_bytes(r)?,
        };
        Ok(bytes)
    }

    pub fn decode(id: i64, payload: &[u8]) -> Result<Self, ProtoError> {
        match id {
            ids::PUT_REQUEST => Ok(Request::Put(from_wire_bytes(payload)?)),
            ids::GET_REQUEST => Ok(Request::Get(from_wire_bytes(payload)?)),
            ids::ERASE_REQUEST => Ok(Request::Erase(from_wire_bytes(payload)?)),
            other => Err(ProtoError::UnknownMessage(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// Reply to a put or an erase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckReply {
    pub error: Option<String>,
}

impl AckReply {
    pub fn ok() -> Self {
        Self { error: None }
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self {
            error: Some(msg.into()),
        }
    }
}

pub type PutReply = AckReply;
pub type EraseReply = AckReply;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetReply {
    pub error: Option<String>,
    pub product: ProductInfo,
    pub compression: Compression,
    pub batch: ChunkBatch,
    pub times: TimesInfo,
    pub time_list: Vec<i64>,
}

impl GetReply {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self {
            error: Some(msg.into()),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Wire impls
// ---------------------------------------------------------------------------

impl WireSerialize for PutRequest {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        self.dir.wire_serialize(buf)?;
        self.product.wire_serialize(buf)?;
        self.mode.wire_serialize(buf)?;
        self.compression.wire_serialize(buf)?;
        self.batch.encode_with(self.compression, buf)
    }
}

impl WireDeserialize for PutRequest {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let dir = String::wire_deserialize(buf, offset)?;
        let product = ProductInfo::wire_deserialize(buf, offset)?;
        let mode = PutMode::wire_deserialize(buf, offset)?;
        let compression = Compression::wire_deserialize(buf, offset)?;
        let batch = ChunkBatch::decode_with(buf, offset, compression)?;
        Ok(Self {
            dir,
            product,
            mode,
            compression,
            batch,
        })
    }
}

fn write_types(data_type: i32, data_type2: i32, buf: &mut Vec<u8>) -> Result<(), WireError> {
    data_type.wire_serialize(buf)?;
    data_type2.wire_serialize(buf)
}

impl WireSerialize for GetQuery {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        match *self {
            GetQuery::Exact { time, data_type, data_type2 } => {
                0u8.wire_serialize(buf)?;
                time.wire_serialize(buf)?;
                write_types(data_type, data_type2, buf)
            }
            GetQuery::Closest { time, margin, data_type, data_type2 } => {
                1u8.wire_serialize(buf)?;
                time.wire_serialize(buf)?;
                margin.wire_serialize(buf)?;
                write_types(data_type, data_type2, buf)
            }
            GetQuery::Interval { start, end, data_type, data_type2 } => {
                2u8.wire_serialize(buf)?;
                start.wire_serialize(buf)?;
                end.wire_serialize(buf)?;
                write_types(data_type, data_type2, buf)
            }
            GetQuery::Valid { time, data_type, data_type2 } => {
                3u8.wire_serialize(buf)?;
                time.wire_serialize(buf)?;
                write_types(data_type, data_type2, buf)
            }
            GetQuery::Latest { margin, data_type, data_type2 } => {
                4u8.wire_serialize(buf)?;
                margin.wire_serialize(buf)?;
                write_types(data_type, data_type2, buf)
            }
            GetQuery::FirstBefore { time, margin, data_type, data_type2 } => {
                5u8.wire_serialize(buf)?;
                time.wire_serialize(buf)?;
                margin.wire_serialize(buf)?;
                write_types(data_type, data_type2, buf)
            }
            GetQuery::FirstAfter { time, margin, data_type, data_type2 } => {
                6u8.wire_serialize(buf)?;
                time.wire_serialize(buf)?;
                margin.wire_serialize(buf)?;
                write_types(data_type, data_type2, buf)
            }
            GetQuery::Times => 7u8.wire_serialize(buf),
            GetQuery::TimeList { start, end, min_interval } => {
                8u8.wire_serialize(buf)?;
                start.wire_serialize(buf)?;
                end.wire_serialize(buf)?;
                min_interval.wire_serialize(buf)
            }
        }
    }
}

impl WireDeserialize for GetQuery {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let tag = u8::wire_deserialize(buf, offset)?;
        let query = match tag {
            0 => GetQuery::Exact {
                time: i64::wire_deserialize(buf, offset)?,
                data_type: i32::wire_deserialize(buf, offset)?,
                data_type2: i32::wire_deserialize(buf, offset)?,
            },
            1 => GetQuery::Closest {
                time: i64::wire_deserialize(buf, offset)?,
                margin: i64::wire_deserialize(buf, offset)?,
                data_type: i32::wire_deserialize(buf, offset)?,
                data_type2: i32::wire_deserialize(buf, offset)?,
            },
            2 => GetQuery::Interval {
                start: i64::wire_deserialize(buf, offset)?,
                end: i64::wire_deserialize(buf, offset)?,
                data_type: i32::wire_deserialize(buf, offset)?,
                data_type2: i32::wire_deserialize(buf, offset)?,
            },
            3 => GetQuery::Valid {
                time: i64::wire_deserialize(buf, offset)?,
                data_type: i32::wire_deserialize(buf, offset)?,
                data_type2: i32::wire_deserialize(buf, offset)?,
            },
            4 => GetQuery::Latest {
                margin: i64::wire_deserialize(buf, offset)?,
                data_type: i32::wire_deserialize(buf, offset)?,
                data_type2: i32::wire_deserialize(buf, offset)?,
            },
            5 => GetQuery::FirstBefore {
                time: i64::wire_deserialize(buf, offset)?,
                margin: i64::wire_deserialize(buf, offset)?,
                data_type: i32::wire_deserialize(buf, offset)?,
                data_type2: i32::wire_deserialize(buf, offset)?,
            },
            6 => GetQuery::FirstAfter {
                time: i64::wire_deserialize(buf, offset)?,
                margin: i64::wire_deserialize(buf, offset)?,
                data_type: i32::wire_deserialize(buf, offset)?,
                data_type2: i32::wire_deserialize(buf, offset)?,
            },
            7 => GetQuery::Times,
            8 => GetQuery::TimeList {
                start: i64::wire_deserialize(buf, offset)?,
                end: i64::wire_deserialize(buf, offset)?,
                min_interval: i64::wire_deserialize(buf, offset)?,
            },
            other => {
                return Err(WireError::InvalidEnumVariant {
                    enum_name: "GetQuery",
                    value: other as u64,
                })
            }
        };
        Ok(query)
    }
}

impl WireSerialize for GetRequest {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        self.dir.wire_serialize(buf)?;
        self.query.wire_serialize(buf)?;
        self.unique.wire_serialize(buf)?;
        self.refs_only.wire_serialize(buf)?;
        self.compression.wire_serialize(buf)
    }
}

impl WireDeserialize for GetRequest {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        Ok(Self {
            dir: String::wire_deserialize(buf, offset)?,
            query: GetQuery::wire_deserialize(buf, offset)?,
            unique: UniqueMode::wire_deserialize(buf, offset)?,
            refs_only: bool::wire_deserialize(buf, offset)?,
            compression: Compression::wire_deserialize(buf, offset)?,
        })
    }
}

impl WireSerialize for EraseRequest {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        self.dir.wire_serialize(buf)?;
        self.valid_time.wire_serialize(buf)?;
        write_types(self.data_type, self.data_type2, buf)
    }
}

impl WireDeserialize for EraseRequest {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        Ok(Self {
            dir: String::wire_deserialize(buf, offset)?,
            valid_time: i64::wire_deserialize(buf, offset)?,
            data_type: i32::wire_deserialize(buf, offset)?,
            data_type2: i32::wire_deserialize(buf, offset)?,
        })
    }
}

impl WireSerialize for AckReply {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        self.error.wire_serialize(buf)
    }
}

impl WireDeserialize for AckReply {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        Ok(Self {
            error: Option::<String>::wire_deserialize(buf, offset)?,
        })
    }
}

impl WireSerialize for GetReply {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        self.error.wire_serialize(buf)?;
        self.product.wire_serialize(buf)?;
        self.compression.wire_serialize(buf)?;
        self.batch.encode_with(self.compression, buf)?;
        self.times.wire_serialize(buf)?;
        self.time_list.wire_serialize(buf)
    }
}

impl WireDeserialize for GetReply {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let error = Option::<String>::wire_deserialize(buf, offset)?;
        let product = ProductInfo::wire_deserialize(buf, offset)?;
        let compression = Compression::wire_deserialize(buf, offset)?;
        Ok(Self {
            error,
            product,
            compression,
            batch: ChunkBatch::decode_with(buf, offset, compression)?,
            times: TimesInfo::wire_deserialize(buf, offset)?,
            time_list: Vec::<i64>::wire_deserialize(buf, offset)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_put() -> PutRequest {
        let mut batch = ChunkBatch::new();
        batch.add_chunk(3, 1000, 1600, b"radar").unwrap();
        batch.add_chunk(0, 1060, 1660, b"").unwrap();
        PutRequest {
            dir: "/data/spdb/radar".to_string(),
            product: ProductInfo::new(100, "Radar volume"),
            mode: PutMode::Once,
            compression: Compression::None,
            batch,
        }
    }

    #[test]
    fn test_request_envelope() {
        let req = Request::Put(sample_put());
        assert_eq!(req.id(), ids::PUT_REQUEST);
        assert_eq!(ids::reply_for(req.id()), Some(req.reply_id()));

        let payload = req.encode().unwrap();
        let decoded = Request::decode(ids::PUT_REQUEST, &payload).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_unknown_request_id() {
        let err = Request::decode(12345, &[]).unwrap_err();
        assert!(matches!(err, ProtoError::UnknownMessage(12345)));
        assert_eq!(ids::reply_for(12345), None);
    }

    #[test]
    fn test_get_query_variants_survive_encoding() {
        let queries = [
            GetQuery::Closest { time: 210, margin: -1, data_type: 0, data_type2: 0 },
            GetQuery::Latest { margin: 30, data_type: 9, data_type2: 3600 },
            GetQuery::FirstAfter { time: 5, margin: 60, data_type: 0, data_type2: 7 },
            GetQuery::Times,
            GetQuery::TimeList { start: 0, end: 500, min_interval: 60 },
        ];
        for query in queries {
            let req = Request::Get(GetRequest {
                dir: "d".to_string(),
                query,
                unique: UniqueMode::Latest,
                refs_only: true,
                compression: Compression::Zstd,
            });
            let payload = req.encode().unwrap();
            assert_eq!(Request::decode(ids::GET_REQUEST, &payload).unwrap(), req);
        }
    }

    #[test]
    fn test_bad_query_tag() {
        let mut payload = Vec::new();
        "d".wire_serialize(&mut payload).unwrap();
        payload.push(42);
        let err = Request::decode(ids::GET_REQUEST, &payload).unwrap_err();
        assert!(matches!(
            err,
            ProtoError::Wire(WireError::InvalidEnumVariant { value: 42, .. })
        ));
    }

    #[test]
    fn test_get_reply_carries_error_and_batch() {
        let reply = GetReply::failed("no such store");
        let bytes = to_wire_bytes(&reply).unwrap();
        let back: GetReply = from_wire_bytes(&bytes).unwrap();
        assert_eq!(back.error.as_deref(), Some("no such store"));
        assert!(back.batch.is_empty());

        let reply = GetReply {
            batch: sample_put().batch,
            times: TimesInfo { first_time: 1000, last_time: 1060, last_valid_time: 1060 },
            ..GetReply::default()
        };
        let bytes = to_wire_bytes(&reply).unwrap();
        let back: GetReply = from_wire_bytes(&bytes).unwrap();
        assert_eq!(back, reply);
        assert_eq!(back.batch.chunk_data(0), Some(&b"radar"[..]));
    }

    #[test]
    fn test_compressed_put_and_reply() {
        let mut put = sample_put();
        put.batch.add_chunk_with_type2(3, 60, 1100, 1700, &b"reflectivity ".repeat(200)).unwrap();
        let plain = Request::Put(put.clone()).encode().unwrap();
        put.compression = Compression::Zstd;
        let req = Request::Put(put);
        let packed = req.encode().unwrap();
        assert!(packed.len() < plain.len());
        assert_eq!(Request::decode(ids::PUT_REQUEST, &packed).unwrap(), req);

        let Request::Put(put) = req else { unreachable!() };
        let reply = GetReply {
            compression: Compression::Zstd,
            batch: put.batch,
            ..GetReply::default()
        };
        let back: GetReply = from_wire_bytes(&to_wire_bytes(&reply).unwrap()).unwrap();
        assert_eq!(back, reply);
        assert_eq!(back.batch.refs()[2].data_type2, 60);
    }

    #[test]
    fn test_erase_request_carries_both_types() {
        let req = Request::Erase(EraseRequest {
            dir: "d".to_string(),
            valid_time: 100,
            data_type: 4,
            data_type2: 3600,
        });
        let payload = req.encode().unwrap();
        assert_eq!(Request::decode(ids::ERASE_REQUEST, &payload).unwrap(), req);
    }

    #[test]
    fn test_ack_reply() {
        let bytes = to_wire_bytes(&AckReply::ok()).unwrap();
        assert_eq!(bytes, vec![0]);
        let back: AckReply = from_wire_bytes(&to_wire_bytes(&AckReply::failed("full")).unwrap()).unwrap();
        assert_eq!(back.error.as_deref(), Some("full"));
    }
}
