//! # osc-relay-core
//!
//! Shared library for the OSC relay containing the OSC packet types and the
//! binary codec used on both the UDP and the WebSocket side of the bridge.
//!
//! This crate has zero dependencies on sockets, async runtimes, or OS APIs.
//!
//! # Architecture overview
//!
//! Open Sound Control (OSC) peers exchange *packets*.  A packet is either a
//! single message (an address such as `/mixer/fader/1` plus typed arguments)
//! or a bundle (a timetag plus nested packets).  The relay receives packets on
//! one transport and forwards them on the other, so it needs exactly two
//! things from this crate:
//!
//! - **`protocol::messages`** – Typed Rust values for messages, arguments,
//!   bundles and timetags.
//!
//! - **`protocol::codec`** – Conversion between those values and the OSC 1.0
//!   binary encoding, plus [`protocol::reencode`] which the relay calls for
//!   every packet it forwards.

pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `osc_relay_core::OscMessage` instead of the full module path.
pub use protocol::codec::{
    decode_message, decode_packet, encode_message, encode_packet, reencode, DecodeError,
    EncodeError, Framing,
};
pub use protocol::messages::{
    OscArg, OscBundle, OscMessage, OscPacket, TimeTag, MAX_BLOB_LEN, MAX_BUNDLE_DEPTH,
};
