//! OSC packet types.
//!
//! Values follow the OSC 1.0 data model: a packet is either a message or a
//! bundle, and a message carries typed arguments.  Only the argument types the
//! relay forwards are modelled; see [`OscArg`].

use std::fmt;

use crate::protocol::codec::{encoded_message_len, padded_len, EncodeError};

// ── Protocol constants ────────────────────────────────────────────────────────

/// The 8-byte marker (`"#bundle"` plus a NUL) that opens every bundle.
pub const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// Maximum number of bundle levels in one packet, counting the outermost.
///
/// Enforced by [`OscBundle::new`] and by the decoder, so anything that can be
/// built can also be decoded.
pub const MAX_BUNDLE_DEPTH: usize = 8;

/// Largest blob the `int32` length prefix can describe.
pub const MAX_BLOB_LEN: usize = i32::MAX as usize;

// ── Time tags ─────────────────────────────────────────────────────────────────

/// A 64-bit NTP timestamp: seconds since 1900-01-01 plus a 32-bit fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeTag {
    pub seconds: u32,
    pub fraction: u32,
}

impl TimeTag {
    /// The special value meaning "execute immediately".
    pub const IMMEDIATELY: TimeTag = TimeTag {
        seconds: 0,
        fraction: 1,
    };

    pub const fn new(seconds: u32, fraction: u32) -> Self {
        Self { seconds, fraction }
    }

    /// Builds a timetag from its big-endian 64-bit wire representation.
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            seconds: (bits >> 32) as u32,
            fraction: bits as u32,
        }
    }

    pub const fn to_bits(self) -> u64 {
        ((self.seconds as u64) << 32) | self.fraction as u64
    }
}

impl fmt::Display for TimeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == TimeTag::IMMEDIATELY {
            f.write_str("immediately")
        } else {
            write!(f, "{}.{:08x}", self.seconds, self.fraction)
        }
    }
}

// ── Arguments ─────────────────────────────────────────────────────────────────

/// One typed OSC argument.
///
/// Equality compares floats by their bit pattern, so a decoded `NaN` equals
/// the `NaN` that was encoded and `0.0` differs from `-0.0`.
#[derive(Debug, Clone)]
pub enum OscArg {
    /// `i`: 32-bit big-endian two's complement integer.
    Int(i32),
    /// `f`: 32-bit big-endian IEEE-754 float.
    Float(f32),
    /// `s`: NUL-terminated string, padded to a 4-byte boundary.
    String(String),
    /// `b`: int32 byte count followed by the bytes, padded to 4 bytes.
    Blob(Vec<u8>),
    /// `t`: 64-bit NTP timetag.
    Time(TimeTag),
}

impl OscArg {
    /// The type-tag character that identifies this argument on the wire.
    pub fn type_tag(&self) -> char {
        match self {
            OscArg::Int(_) => 'i',
            OscArg::Float(_) => 'f',
            OscArg::String(_) => 's',
            OscArg::Blob(_) => 'b',
            OscArg::Time(_) => 't',
        }
    }

    /// Number of bytes this argument occupies in the encoded message.
    pub fn encoded_len(&self) -> usize {
        match self {
            OscArg::Int(_) | OscArg::Float(_) => 4,
            OscArg::String(s) => padded_len(s.len() + 1),
            OscArg::Blob(b) => 4 + padded_len(b.len()),
            OscArg::Time(_) => 8,
        }
    }
}

impl PartialEq for OscArg {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (OscArg::Int(a), OscArg::Int(b)) => a == b,
            (OscArg::Float(a), OscArg::Float(b)) => a.to_bits() == b.to_bits(),
            (OscArg::String(a), OscArg::String(b)) => a == b,
            (OscArg::Blob(a), OscArg::Blob(b)) => a == b,
            (OscArg::Time(a), OscArg::Time(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for OscArg {}

impl From<i32> for OscArg {
    fn from(v: i32) -> Self {
        OscArg::Int(v)
    }
}

impl From<f32> for OscArg {
    fn from(v: f32) -> Self {
        OscArg::Float(v)
    }
}

impl From<&str> for OscArg {
    fn from(v: &str) -> Self {
        OscArg::String(v.to_string())
    }
}

impl From<String> for OscArg {
    fn from(v: String) -> Self {
        OscArg::String(v)
    }
}

impl From<Vec<u8>> for OscArg {
    fn from(v: Vec<u8>) -> Self {
        OscArg::Blob(v)
    }
}

impl From<TimeTag> for OscArg {
    fn from(v: TimeTag) -> Self {
        OscArg::Time(v)
    }
}

impl fmt::Display for OscArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OscArg::Int(v) => write!(f, "{v}"),
            OscArg::Float(v) => write!(f, "{v}"),
            OscArg::String(s) => write!(f, "{s:?}"),
            OscArg::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
            OscArg::Time(t) => write!(f, "<time {t}>"),
        }
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// An addressed OSC message.
///
/// Fields are private so a message cannot change after it has been built or
/// decoded; `wire_len` always matches the canonical encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OscMessage {
    address: String,
    args: Vec<OscArg>,
    wire_len: usize,
}

impl OscMessage {
    /// Builds a message, validating that it can be encoded.
    ///
    /// # Errors
    ///
    /// - [`EncodeError::InvalidAddress`] if `address` does not start with `/`.
    /// - [`EncodeError::InteriorNul`] if the address or a string argument
    ///   contains a NUL byte (it would terminate the string early on the wire).
    /// - [`EncodeError::BlobTooLarge`] if a blob is longer than
    ///   [`MAX_BLOB_LEN`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use osc_relay_core::{OscArg, OscMessage};
    ///
    /// let msg = OscMessage::new("/test", vec![OscArg::Int(1), "hi".into()]).unwrap();
    /// assert_eq!(msg.address(), "/test");
    /// assert_eq!(msg.wire_len(), 20);
    /// ```
    pub fn new(address: impl Into<String>, args: Vec<OscArg>) -> Result<Self, EncodeError> {
        let address = address.into();
        if !address.starts_with('/') {
            return Err(EncodeError::InvalidAddress(address));
        }
        if address.contains('\0') {
            return Err(EncodeError::InteriorNul);
        }
        for arg in &args {
            match arg {
                OscArg::String(s) if s.contains('\0') => return Err(EncodeError::InteriorNul),
                OscArg::Blob(b) if b.len() > MAX_BLOB_LEN => {
                    return Err(EncodeError::BlobTooLarge(b.len()))
                }
                _ => {}
            }
        }
        let wire_len = encoded_message_len(&address, &args);
        Ok(Self {
            address,
            args,
            wire_len,
        })
    }

    /// Used by the decoder, which has already validated every field.
    pub(crate) fn from_decoded(address: String, args: Vec<OscArg>, wire_len: usize) -> Self {
        Self {
            address,
            args,
            wire_len,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn args(&self) -> &[OscArg] {
        &self.args
    }

    /// Size in bytes of this message's wire encoding.
    pub fn wire_len(&self) -> usize {
        self.wire_len
    }

    /// The type-tag string without the leading comma, e.g. `"is"`.
    pub fn type_tags(&self) -> String {
        self.args.iter().map(OscArg::type_tag).collect()
    }

    pub fn into_parts(self) -> (String, Vec<OscArg>) {
        (self.address, self.args)
    }
}

impl fmt::Display for OscMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

// ── Bundles and packets ───────────────────────────────────────────────────────

/// A timetag plus an ordered list of nested packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OscBundle {
    timetag: TimeTag,
    elements: Vec<OscPacket>,
    depth: usize,
}

impl OscBundle {
    /// Builds a bundle.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::NestingTooDeep`] if the bundle would contain
    /// more than [`MAX_BUNDLE_DEPTH`] bundle levels, itself included.
    pub fn new(timetag: TimeTag, elements: Vec<OscPacket>) -> Result<Self, EncodeError> {
        let depth = 1 + elements.iter().map(OscPacket::bundle_depth).max().unwrap_or(0);
        if depth > MAX_BUNDLE_DEPTH {
            return Err(EncodeError::NestingTooDeep(depth));
        }
        Ok(Self {
            timetag,
            elements,
            depth,
        })
    }

    pub fn timetag(&self) -> TimeTag {
        self.timetag
    }

    pub fn elements(&self) -> &[OscPacket] {
        &self.elements
    }

    /// Bundle levels in this bundle, itself included (1 for a flat bundle).
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Every message in the bundle, depth-first, in wire order.
    ///
    /// Messages of nested bundles are included; they all share this bundle's
    /// timetag as far as the relay is concerned.
    pub fn messages(&self) -> Vec<&OscMessage> {
        let mut out = Vec::new();
        collect_messages(&self.elements, &mut out);
        out
    }
}

fn collect_messages<'a>(elements: &'a [OscPacket], out: &mut Vec<&'a OscMessage>) {
    for element in elements {
        match element {
            OscPacket::Message(m) => out.push(m),
            OscPacket::Bundle(b) => collect_messages(&b.elements, out),
        }
    }
}

/// The unit carried by one UDP datagram or one WebSocket binary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OscPacket {
    Message(OscMessage),
    Bundle(OscBundle),
}

impl OscPacket {
    /// Bundle levels in this packet; 0 for a plain message.
    pub fn bundle_depth(&self) -> usize {
        match self {
            OscPacket::Message(_) => 0,
            OscPacket::Bundle(b) => b.depth,
        }
    }

    /// All messages carried by this packet, in wire order.
    pub fn messages(&self) -> Vec<&OscMessage> {
        match self {
            OscPacket::Message(m) => vec![m],
            OscPacket::Bundle(b) => b.messages(),
        }
    }

    /// Size in bytes of this packet's canonical encoding.
    pub fn wire_len(&self) -> usize {
        match self {
            OscPacket::Message(m) => m.wire_len(),
            // marker + timetag, then a 4-byte size prefix per element
            OscPacket::Bundle(b) => {
                BUNDLE_TAG.len()
                    + 8
                    + b.elements.iter().map(|e| 4 + e.wire_len()).sum::<usize>()
            }
        }
    }
}

impl From<OscMessage> for OscPacket {
    fn from(m: OscMessage) -> Self {
        OscPacket::Message(m)
    }
}

impl From<OscBundle> for OscPacket {
    fn from(b: OscBundle) -> Self {
        OscPacket::Bundle(b)
    }
}

impl fmt::Display for OscPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OscPacket::Message(m) => write!(f, "{m}"),
            OscPacket::Bundle(b) => write!(
                f,
                "#bundle {} ({} elements)",
                b.timetag,
                b.elements.len()
            ),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
