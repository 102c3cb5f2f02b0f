//! Binary codec for OSC 1.0 packets.
//!
//! Message wire format:
//! ```text
//! [address: padded string][type tags: padded string starting with ','][args...]
//! ```
//! Bundle wire format:
//! ```text
//! ["#bundle\0": 8][timetag: 8]([element_len: 4][element: element_len])*
//! ```
//! Strings are NUL-terminated and padded with NULs to a multiple of 4 bytes.
//! All multi-byte integers are big-endian.

use thiserror::Error;

use crate::protocol::messages::{
    OscArg, OscBundle, OscMessage, OscPacket, TimeTag, BUNDLE_TAG, MAX_BUNDLE_DEPTH,
};

/// Errors that can occur while decoding a packet.
///
/// Either variant means the whole packet is unusable; the relay drops it
/// rather than forwarding part of it.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    /// The bytes do not form a valid OSC packet (truncation, bad padding,
    /// bad address, trailing garbage, ...).
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// A type tag the codec does not support was found.
    #[error("unsupported type tag '{0}'")]
    UnsupportedType(char),
}

/// Errors that can occur while building a message for encoding.
#[derive(Debug, Error, PartialEq)]
pub enum EncodeError {
    /// OSC addresses must begin with `/`.
    #[error("address must start with '/': {0:?}")]
    InvalidAddress(String),

    /// Strings are NUL-terminated on the wire, so they cannot contain NULs.
    #[error("string contains an interior NUL byte")]
    InteriorNul,

    /// A blob's length does not fit the `int32` size prefix.
    #[error("blob of {0} bytes exceeds the int32 length prefix")]
    BlobTooLarge(usize),

    /// The bundle would hold more levels than a decoder accepts.
    #[error("bundle nesting of {0} levels exceeds {MAX_BUNDLE_DEPTH}")]
    NestingTooDeep(usize),
}

/// How packets are delimited by the transport that carries them.
///
/// A UDP datagram carries exactly one packet and so does a WebSocket binary
/// frame; in both cases the transport boundary delimits the packet and the
/// inner encoding is identical.  The framing is still passed explicitly so the
/// call sites say which side of the bridge the bytes belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One packet per UDP datagram, no length prefix.
    Datagram,
    /// One packet per WebSocket binary frame, no length prefix.
    WebSocket,
}

impl std::fmt::Display for Framing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Framing::Datagram => f.write_str("udp"),
            Framing::WebSocket => f.write_str("websocket"),
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes one complete packet (message or bundle) carried by `framing`.
///
/// # Errors
///
/// Returns [`DecodeError`] if the bytes are malformed or use an unsupported
/// type tag anywhere in the packet, including inside nested bundles.
///
/// # Examples
///
/// ```rust
/// use osc_relay_core::{decode_packet, encode_packet, Framing, OscArg, OscMessage, OscPacket};
///
/// let msg = OscMessage::new("/test", vec![OscArg::Int(1), "hi".into()]).unwrap();
/// let bytes = encode_packet(&OscPacket::Message(msg.clone()), Framing::Datagram);
/// let decoded = decode_packet(&bytes, Framing::Datagram).unwrap();
/// assert_eq!(decoded, OscPacket::Message(msg));
/// ```
pub fn decode_packet(bytes: &[u8], framing: Framing) -> Result<OscPacket, DecodeError> {
    match framing {
        // The unit boundary is the packet boundary for both transports.
        Framing::Datagram | Framing::WebSocket => decode_packet_at_depth(bytes, 0),
    }
}

/// Encodes a packet for `framing`.
///
/// Encoding is the exact inverse of [`decode_packet`]:
/// `decode_packet(&encode_packet(&p, f), f) == Ok(p)`.
pub fn encode_packet(packet: &OscPacket, framing: Framing) -> Vec<u8> {
    let mut buf = Vec::with_capacity(packet.wire_len());
    match framing {
        Framing::Datagram | Framing::WebSocket => write_packet(&mut buf, packet),
    }
    buf
}

/// Decodes a single message (not a bundle).
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] if `bytes` is a bundle or is not a
/// valid message, and [`DecodeError::UnsupportedType`] for unknown tags.
pub fn decode_message(bytes: &[u8]) -> Result<OscMessage, DecodeError> {
    if bytes.is_empty() {
        return Err(malformed("empty packet"));
    }
    let mut r = Reader::new(bytes);

    let address = r.read_string("address")?;
    if !address.starts_with('/') {
        return Err(malformed(format!(
            "address must start with '/', got {address:?}"
        )));
    }

    if r.is_empty() {
        return Err(malformed("missing type tag string"));
    }
    let tags = r.read_string("type tags")?;
    let tags = tags
        .strip_prefix(',')
        .ok_or_else(|| malformed(format!("type tag string must start with ',', got {tags:?}")))?;

    // Check every tag before touching argument bytes so an unknown tag is
    // reported as such even when the argument data is also short.
    if let Some(bad) = tags.chars().find(|c| !matches!(c, 'i' | 'f' | 's' | 'b' | 't')) {
        return Err(DecodeError::UnsupportedType(bad));
    }

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        let arg = match tag {
            'i' => OscArg::Int(r.read_i32("int32 argument")?),
            'f' => OscArg::Float(f32::from_bits(r.read_u32("float32 argument")?)),
            's' => OscArg::String(r.read_string("string argument")?),
            'b' => OscArg::Blob(r.read_blob()?),
            't' => OscArg::Time(TimeTag::from_bits(r.read_u64("timetag argument")?)),
            other => return Err(DecodeError::UnsupportedType(other)),
        };
        args.push(arg);
    }

    if !r.is_empty() {
        return Err(malformed(format!(
            "{} trailing bytes after last argument",
            r.remaining()
        )));
    }

    Ok(OscMessage::from_decoded(address, args, bytes.len()))
}

/// Encodes a single message.
pub fn encode_message(msg: &OscMessage) -> Vec<u8> {
    let mut buf = Vec::with_capacity(msg.wire_len());
    write_message(&mut buf, msg);
    buf
}

/// Decodes `bytes` as framed by `from` and re-encodes the packet for `to`.
///
/// This is the per-packet work of the bridge.  The output is the canonical
/// encoding of the decoded packet, so a packet that fails to decode is never
/// forwarded, not even partially.
///
/// # Errors
///
/// Returns the [`DecodeError`] produced while decoding.
pub fn reencode(bytes: &[u8], from: Framing, to: Framing) -> Result<Vec<u8>, DecodeError> {
    let packet = decode_packet(bytes, from)?;
    Ok(encode_packet(&packet, to))
}

// ── Packet decoding ───────────────────────────────────────────────────────────

fn decode_packet_at_depth(bytes: &[u8], depth: usize) -> Result<OscPacket, DecodeError> {
    if bytes.starts_with(BUNDLE_TAG) {
        decode_bundle(bytes, depth).map(OscPacket::Bundle)
    } else {
        decode_message(bytes).map(OscPacket::Message)
    }
}

fn decode_bundle(bytes: &[u8], depth: usize) -> Result<OscBundle, DecodeError> {
    if depth >= MAX_BUNDLE_DEPTH {
        return Err(malformed(format!(
            "bundle nesting deeper than {MAX_BUNDLE_DEPTH}"
        )));
    }

    let mut r = Reader::new(bytes);
    r.take(BUNDLE_TAG.len(), "bundle marker")?;
    let timetag = TimeTag::from_bits(r.read_u64("bundle timetag")?);

    let mut elements = Vec::new();
    while !r.is_empty() {
        let size = r.read_i32("bundle element size")?;
        if size <= 0 || size % 4 != 0 {
            return Err(malformed(format!("invalid bundle element size {size}")));
        }
        let element = r.take(size as usize, "bundle element")?;
        elements.push(decode_packet_at_depth(element, depth + 1)?);
    }

    // Depth was checked on the way down, so this only fails on a logic error.
    OscBundle::new(timetag, elements).map_err(|e| malformed(e.to_string()))
}

// ── Packet encoding ───────────────────────────────────────────────────────────

fn write_packet(buf: &mut Vec<u8>, packet: &OscPacket) {
    match packet {
        OscPacket::Message(m) => write_message(buf, m),
        OscPacket::Bundle(b) => write_bundle(buf, b),
    }
}

fn write_message(buf: &mut Vec<u8>, msg: &OscMessage) {
    write_padded_string(buf, msg.address());

    let mut tags = String::with_capacity(msg.args().len() + 1);
    tags.push(',');
    tags.extend(msg.args().iter().map(OscArg::type_tag));
    write_padded_string(buf, &tags);

    for arg in msg.args() {
        match arg {
            OscArg::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
            OscArg::Float(v) => buf.extend_from_slice(&v.to_bits().to_be_bytes()),
            OscArg::String(s) => write_padded_string(buf, s),
            OscArg::Blob(b) => {
                // OscMessage::new caps blobs at MAX_BLOB_LEN.
                buf.extend_from_slice(&(b.len() as i32).to_be_bytes());
                buf.extend_from_slice(b);
                pad_to_boundary(buf);
            }
            OscArg::Time(t) => buf.extend_from_slice(&t.to_bits().to_be_bytes()),
        }
    }
}

fn write_bundle(buf: &mut Vec<u8>, bundle: &OscBundle) {
    buf.extend_from_slice(BUNDLE_TAG);
    buf.extend_from_slice(&bundle.timetag().to_bits().to_be_bytes());
    for element in bundle.elements() {
        // Reserve the size prefix, write the element, then patch the size in.
        let size_at = buf.len();
        buf.extend_from_slice(&[0u8; 4]);
        write_packet(buf, element);
        let size = (buf.len() - size_at - 4) as i32;
        buf[size_at..size_at + 4].copy_from_slice(&size.to_be_bytes());
    }
}

// ── Utility helpers ───────────────────────────────────────────────────────────

/// Rounds `n` up to the next multiple of 4.
pub(crate) fn padded_len(n: usize) -> usize {
    (n + 3) & !3
}

/// Length of the canonical encoding of a message with these parts.
pub(crate) fn encoded_message_len(address: &str, args: &[OscArg]) -> usize {
    padded_len(address.len() + 1)
        + padded_len(args.len() + 2) // ',' + tags + NUL
        + args.iter().map(OscArg::encoded_len).sum::<usize>()
}

fn write_padded_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    pad_to_boundary(buf);
}

fn pad_to_boundary(buf: &mut Vec<u8>) {
    let target = padded_len(buf.len());
    buf.resize(target, 0);
}

fn malformed(reason: impl Into<String>) -> DecodeError {
    DecodeError::Malformed(reason.into())
}

/// Cursor over a packet's bytes.  Every read checks bounds and padding.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(malformed(format!(
                "truncated {what}: need {n} bytes, got {}",
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self, what: &str) -> Result<u32, DecodeError> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i32(&mut self, what: &str) -> Result<i32, DecodeError> {
        self.read_u32(what).map(|v| v as i32)
    }

    fn read_u64(&mut self, what: &str) -> Result<u64, DecodeError> {
        let hi = self.read_u32(what)? as u64;
        let lo = self.read_u32(what)? as u64;
        Ok((hi << 32) | lo)
    }

    fn read_string(&mut self, what: &str) -> Result<String, DecodeError> {
        let rest = &self.bytes[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| malformed(format!("truncated {what}: no NUL terminator")))?;
        let field = self.take(padded_len(nul + 1), what)?;
        check_zero_padding(&field[nul..], what)?;
        std::str::from_utf8(&field[..nul])
            .map(str::to_string)
            .map_err(|e| malformed(format!("{what} is not valid UTF-8: {e}")))
    }

    fn read_blob(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_i32("blob size")?;
        if len < 0 {
            return Err(malformed(format!("negative blob size {len}")));
        }
        let len = len as usize;
        let field = self.take(padded_len(len), "blob data")?;
        check_zero_padding(&field[len..], "blob")?;
        Ok(field[..len].to_vec())
    }
}

fn check_zero_padding(padding: &[u8], what: &str) -> Result<(), DecodeError> {
    if padding.iter().all(|&b| b == 0) {
        Ok(())
    } else {
        Err(malformed(format!("non-zero padding after {what}")))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
