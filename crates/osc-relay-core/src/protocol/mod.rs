//! Protocol module containing OSC packet types and the binary codec.

pub mod codec;
pub mod messages;

pub use codec::{
    decode_message, decode_packet, encode_message, encode_packet, reencode, DecodeError,
    EncodeError, Framing,
};
pub use messages::*;
