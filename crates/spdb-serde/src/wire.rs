use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("insufficient data: need {need} bytes but only {have} remain")]
    InsufficientData { need: usize, have: usize },
    #[error("invalid enum variant for {enum_name}: {value}")]
    InvalidEnumVariant {
        enum_name: &'static str,
        value: u64,
    },
    #[error("invalid UTF-8 string")]
    InvalidUtf8,
    #[error("data too large: {size} bytes")]
    DataTooLarge { size: usize },
    #[error("{remaining} trailing bytes after decoding")]
    TrailingBytes { remaining: usize },
    #[error("invalid value: {0}")]
    Invalid(String),
}

pub trait WireSerialize {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError>;
}

pub trait WireDeserialize: Sized {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError>;
}

/// Serialize a value into a fresh buffer.
pub fn to_wire_bytes<T: WireSerialize + ?Sized>(val: &T) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::new();
    val.wire_serialize(&mut buf)?;
    Ok(buf)
}

/// Deserialize a value that must occupy the whole of `buf`.
pub fn from_wire_bytes<T: WireDeserialize>(buf: &[u8]) -> Result<T, WireError> {
    let mut offset = 0;
    let val = T::wire_deserialize(buf, &mut offset)?;
    if offset != buf.len() {
        return Err(WireError::TrailingBytes {
            remaining: buf.len() - offset,
        });
    }
    Ok(val)
}

pub(crate) fn read_bytes<'a>(
    buf: &'a [u8],
    offset: &mut usize,
    n: usize,
) -> Result<&'a [u8], WireError> {
    let have = buf.len().saturating_sub(*offset);
    if have < n {
        return Err(WireError::InsufficientData { need: n, have });
    }
    let slice = &buf[*offset..*offset + n];
    *offset += n;
    Ok(slice)
}

/// Write a length-prefixed byte buffer in one copy. Same layout as `Vec<u8>`.
pub fn write_byte_buf(bytes: &[u8], buf: &mut Vec<u8>) -> Result<(), WireError> {
    write_len(bytes.len(), buf)?;
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Borrow a buffer written by [`write_byte_buf`] without copying it.
pub fn read_byte_buf<'a>(buf: &'a [u8], offset: &mut usize) -> Result<&'a [u8], WireError> {
    let len = u32::wire_deserialize(buf, offset)? as usize;
    read_bytes(buf, offset, len)
}

/// Write a `u32` length prefix, rejecting buffers that cannot be described by one.
fn write_len(len: usize, buf: &mut Vec<u8>) -> Result<(), WireError> {
    let len = u32::try_from(len).map_err(|_| WireError::DataTooLarge { size: len })?;
    len.wire_serialize(buf)
}

// ---------------------------------------------------------------------------
// Integer types (big-endian on the wire)
// ---------------------------------------------------------------------------

macro_rules! impl_wire_for_int {
    ($ty:ty, $size:expr, $read:ident, $write:ident) => {
        impl WireSerialize for $ty {
            fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
                let mut tmp = [0u8; $size];
                BigEndian::$write(&mut tmp, *self);
                buf.extend_from_slice(&tmp);
                Ok(())
            }
        }

        impl WireDeserialize for $ty {
            fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
                let bytes = read_bytes(buf, offset, $size)?;
                Ok(BigEndian::$read(bytes))
            }
        }
    };
}

impl_wire_for_int!(u16, 2, read_u16, write_u16);
impl_wire_for_int!(u32, 4, read_u32, write_u32);
impl_wire_for_int!(u64, 8, read_u64, write_u64);
impl_wire_for_int!(i32, 4, read_i32, write_i32);
impl_wire_for_int!(i64, 8, read_i64, write_i64);

impl WireSerialize for u8 {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        buf.push(*self);
        Ok(())
    }
}

impl WireDeserialize for u8 {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let bytes = read_bytes(buf, offset, 1)?;
        Ok(bytes[0])
    }
}

// ---------------------------------------------------------------------------
// bool
// ---------------------------------------------------------------------------

impl WireSerialize for bool {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        buf.push(u8::from(*self));
        Ok(())
    }
}

impl WireDeserialize for bool {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let v = u8::wire_deserialize(buf, offset)?;
        Ok(v != 0)
    }
}

// ---------------------------------------------------------------------------
// String
// ---------------------------------------------------------------------------

impl WireSerialize for String {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        self.as_str().wire_serialize(buf)
    }
}

impl WireSerialize for str {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        write_len(self.len(), buf)?;
        buf.extend_from_slice(self.as_bytes());
        Ok(())
    }
}

impl WireDeserialize for String {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let len = u32::wire_deserialize(buf, offset)? as usize;
        let bytes = read_bytes(buf, offset, len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }
}

// ---------------------------------------------------------------------------
// bytes::Bytes
// ---------------------------------------------------------------------------

impl WireSerialize for bytes::Bytes {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        write_byte_buf(self, buf)
    }
}

impl WireDeserialize for bytes::Bytes {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        Ok(bytes::Bytes::copy_from_slice(read_byte_buf(buf, offset)?))
    }
}

// ---------------------------------------------------------------------------
// Vec<T> (generic)
// ---------------------------------------------------------------------------

// Vec<u8> goes through this impl too: a u32 count followed by the raw bytes.
// Large byte buffers should use write_byte_buf/read_byte_buf instead.

impl<T: WireSerialize> WireSerialize for Vec<T> {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        write_len(self.len(), buf)?;
        for item in self {
            item.wire_serialize(buf)?;
        }
        Ok(())
    }
}

impl<T: WireDeserialize> WireDeserialize for Vec<T> {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let len = u32::wire_deserialize(buf, offset)? as usize;
        // Cap the pre-allocation by what is left in the buffer so a corrupt
        // count cannot trigger a huge allocation.
        let mut result = Vec::with_capacity(len.min(buf.len().saturating_sub(*offset)));
        for _ in 0..len {
            result.push(T::wire_deserialize(buf, offset)?);
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Option<T>
// ---------------------------------------------------------------------------

impl<T: WireSerialize> WireSerialize for Option<T> {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        match self {
            None => 0u8.wire_serialize(buf),
            Some(val) => {
                1u8.wire_serialize(buf)?;
                val.wire_serialize(buf)
            }
        }
    }
}

impl<T: WireDeserialize> WireDeserialize for Option<T> {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let tag = u8::wire_deserialize(buf, offset)?;
        match tag {
            0 => Ok(None),
            _ => Ok(Some(T::wire_deserialize(buf, offset)?)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
