use serde::{Deserialize, Serialize};
use spdb_serde::{WireDeserialize, WireError, WireSerialize};

/// Identity of the product stored in a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub prod_id: i32,
    pub prod_label: String,
}

impl ProductInfo {
    pub fn new(prod_id: i32, prod_label: impl Into<String>) -> Self {
        Self {
            prod_id,
            prod_label: prod_label.into(),
        }
    }
}

impl WireSerialize for ProductInfo {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        self.prod_id.wire_serialize(buf)?;
        self.prod_label.wire_serialize(buf)
    }
}

impl WireDeserialize for ProductInfo {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        Ok(Self {
            prod_id: i32::wire_deserialize(buf, offset)?,
            prod_label: String::wire_deserialize(buf, offset)?,
        })
    }
}

/// Summary of the times present in a store. All zero when it is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimesInfo {
    pub first_time: i64,
    pub last_time: i64,
    pub last_valid_time: i64,
}

impl TimesInfo {
    pub fn is_empty(&self) -> bool {
        self.first_time == 0 && self.last_time == 0
    }
}

impl WireSerialize for TimesInfo {
    fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        self.first_time.wire_serialize(buf)?;
        self.last_time.wire_serialize(buf)?;
        self.last_valid_time.wire_serialize(buf)
    }
}

impl WireDeserialize for TimesInfo {
    fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        Ok(Self {
            first_time: i64::wire_deserialize(buf, offset)?,
            last_time: i64::wire_deserialize(buf, offset)?,
            last_valid_time: i64::wire_deserialize(buf, offset)?,
        })
    }
}
