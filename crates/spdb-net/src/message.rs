//! Frame header encoding.
//!
//! ```text
//! [cookie: 8 bytes BE][id, len, seq_no: 3 x i32 BE]   cookie 0xF0F0F0F0F0F0F0F0
//! [cookie: 8 bytes BE][id, len, seq_no: 3 x i64 BE]   cookie 0xF6F6F6F6F6F6F6F6
//! [payload: len bytes]
//! ```
//!
//! The receiver picks the header variant from the cookie alone.

use byteorder::{BigEndian, ByteOrder};

use crate::error::NetError;

pub const MAGIC_COOKIE_32: u64 = 0xF0F0_F0F0_F0F0_F0F0;
pub const MAGIC_COOKIE_64: u64 = 0xF6F6_F6F6_F6F6_F6F6;

pub const COOKIE_SIZE: usize = 8;
pub const HEADER32_SIZE: usize = 12;
pub const HEADER64_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHeader {
    Header32 { id: i32, len: i32, seq_no: i32 },
    Header64 { id: i64, len: i64, seq_no: i64 },
}

impl FrameHeader {
    /// Pick the narrowest variant that can describe the frame.
    pub fn for_payload(id: i64, len: usize, seq_no: i64) -> Self {
        match (i32::try_from(id), i32::try_from(len), i32::try_from(seq_no)) {
            (Ok(id), Ok(len), Ok(seq_no)) => FrameHeader::Header32 { id, len, seq_no },
            _ => FrameHeader::Header64 {
                id,
                len: len as i64,
                seq_no,
            },
        }
    }

    pub fn id(&self) -> i64 {
        match *self {
            FrameHeader::Header32 { id, .. } => id as i64,
            FrameHeader::Header64 { id, .. } => id,
        }
    }

    pub fn len(&self) -> i64 {
        match *self {
            FrameHeader::Header32 { len, .. } => len as i64,
            FrameHeader::Header64 { len, .. } => len,
        }
    }

    pub fn seq_no(&self) -> i64 {
        match *self {
            FrameHeader::Header32 { seq_no, .. } => seq_no as i64,
            FrameHeader::Header64 { seq_no, .. } => seq_no,
        }
    }

    pub fn cookie(&self) -> u64 {
        match self {
            FrameHeader::Header32 { .. } => MAGIC_COOKIE_32,
            FrameHeader::Header64 { .. } => MAGIC_COOKIE_64,
        }
    }

    /// Header size (excluding the cookie) announced by `cookie`.
    pub fn header_size_for_cookie(cookie: u64) -> Result<usize, NetError> {
        match cookie {
            MAGIC_COOKIE_32 => Ok(HEADER32_SIZE),
            MAGIC_COOKIE_64 => Ok(HEADER64_SIZE),
            other => Err(NetError::BadMagicCookie(other)),
        }
    }

    /// Payload length as a buffer size.
    pub fn payload_len(&self) -> Result<usize, NetError> {
        let len = self.len();
        usize::try_from(len).map_err(|_| NetError::InvalidLength(len))
    }

    /// Cookie plus header size on the wire.
    pub fn encoded_len(&self) -> usize {
        COOKIE_SIZE
            + match self {
                FrameHeader::Header32 { .. } => HEADER32_SIZE,
                FrameHeader::Header64 { .. } => HEADER64_SIZE,
            }
    }

    /// Append cookie and header to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.resize(start + self.encoded_len(), 0);
        let out = &mut buf[start..];
        BigEndian::write_u64(&mut out[..COOKIE_SIZE], self.cookie());
        let out = &mut out[COOKIE_SIZE..];
        match *self {
            FrameHeader::Header32 { id, len, seq_no } => {
                BigEndian::write_i32(&mut out[0..4], id);
                BigEndian::write_i32(&mut out[4..8], len);
                BigEndian::write_i32(&mut out[8..12], seq_no);
            }
            FrameHeader::Header64 { id, len, seq_no } => {
                BigEndian::write_i64(&mut out[0..8], id);
                BigEndian::write_i64(&mut out[8..16], len);
                BigEndian::write_i64(&mut out[16..24], seq_no);
            }
        }
    }

    /// Decode the header that follows `cookie`. `bytes` must hold exactly
    /// [`FrameHeader::header_size_for_cookie`] bytes.
    pub fn decode(cookie: u64, bytes: &[u8]) -> Result<Self, NetError> {
        let need = Self::header_size_for_cookie(cookie)?;
        if bytes.len() != need {
            return Err(NetError::ShortRead {
                expected: need,
                got: bytes.len(),
            });
        }
        Ok(match cookie {
            MAGIC_COOKIE_32 => FrameHeader::Header32 {
                id: BigEndian::read_i32(&bytes[0..4]),
                len: BigEndian::read_i32(&bytes[4..8]),
                seq_no: BigEndian::read_i32(&bytes[8..12]),
            },
            _ => FrameHeader::Header64 {
                id: BigEndian::read_i64(&bytes[0..8]),
                len: BigEndian::read_i64(&bytes[8..16]),
                seq_no: BigEndian::read_i64(&bytes[16..24]),
            },
        })
    }
}

/// One received frame. The payload borrows the socket's receive buffer and
/// is valid until the next read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef<'a> {
    pub header: FrameHeader,
    pub payload: &'a [u8],
}

impl MessageRef<'_> {
    pub fn id(&self) -> i64 {
        self.header.id()
    }

    pub fn seq_no(&self) -> i64 {
        self.header.seq_no()
    }
}
