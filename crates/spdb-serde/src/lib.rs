//! Big-endian wire encoding shared by the chunk codec and the request/reply
//! messages exchanged with an Spdb server.

mod wire;

pub use wire::{
    from_wire_bytes, read_byte_buf, to_wire_bytes, write_byte_buf, WireDeserialize, WireError,
    WireSerialize,
};
