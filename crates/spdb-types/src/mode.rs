use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use spdb_serde::{WireDeserialize, WireError, WireSerialize};

/// How a put treats chunks already stored at the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PutMode {
    /// Replace any chunk with the same valid time and data types.
    #[default]
    Overwrite,
    /// Keep existing chunks and add the new one alongside.
    Add,
    /// Store only if nothing exists at the same valid time and data types.
    Once,
    /// Add alongside existing chunks unless an identical chunk (same key,
    /// expire time and payload) is already stored.
    AddUnique,
}

/// Post-fetch filter keeping one chunk per data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniqueMode {
    #[default]
    Off,
    Latest,
    Earliest,
}

/// How a chunk data buffer is packed for transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    #[default]
    None,
    Zstd,
}

macro_rules! wire_enum {
    ($ty:ident, $name:literal, { $($variant:ident = $val:literal => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_u8(self) -> u8 {
                match self {
                    $($ty::$variant => $val,)+
                }
            }

            pub fn from_u8(v: u8) -> Option<Self> {
                match v {
                    $($val => Some($ty::$variant),)+
                    _ => None,
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    other => Err(format!("unknown {}: {other}", $name)),
                }
            }
        }

        impl WireSerialize for $ty {
            fn wire_serialize(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
                self.as_u8().wire_serialize(buf)
            }
        }

        impl WireDeserialize for $ty {
            fn wire_deserialize(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
                let v = u8::wire_deserialize(buf, offset)?;
                $ty::from_u8(v).ok_or(WireError::InvalidEnumVariant {
                    enum_name: $name,
                    value: v as u64,
                })
            }
        }
    };
}

wire_enum!(PutMode, "put mode", {
    Overwrite = 0 => "overwrite",
    Add = 1 => "add",
    Once = 2 => "once",
    AddUnique = 3 => "add_unique",
});

wire_enum!(UniqueMode, "unique mode", {
    Off = 0 => "off",
    Latest = 1 => "latest",
    Earliest = 2 => "earliest",
});

wire_enum!(Compression, "compression", {
    None = 0 => "none",
    Zstd = 1 => "zstd",
});
