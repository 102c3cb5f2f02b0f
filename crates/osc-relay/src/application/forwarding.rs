//! Packet forwarding between the two transports.
//!
//! One forwarder task runs per direction.  Each consumes its transport's
//! inbound channel in order, so packets from one source are relayed in the
//! order they arrived.  Decoding happens here rather than in the receive
//! loops, so a slow or failing decode never delays the next receive.
//!
//! ```text
//! UdpTransport ──UdpDatagram──▶ forward_udp_to_ws ──broadcast──▶ WsTransport
//! WsTransport  ──WsFrame─────▶ forward_ws_to_udp ──send(last peer or target)──▶ UdpTransport
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use osc_relay_core::{decode_packet, encode_packet, DecodeError, Framing};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::{Endpoint, RelayCounters};
use crate::infrastructure::{UdpDatagram, UdpTransport, WsFrame, WsTransport};

/// Counters shared between the forwarders and the status report.
#[derive(Debug, Default)]
pub struct RelayStats {
    udp_to_ws: AtomicU64,
    ws_to_udp: AtomicU64,
    decode_errors: AtomicU64,
    dropped_no_peer: AtomicU64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelayCounters {
        RelayCounters {
            udp_to_ws: self.udp_to_ws.load(Ordering::Relaxed),
            ws_to_udp: self.ws_to_udp.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            dropped_no_peer: self.dropped_no_peer.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Decodes one packet received with `from` framing and re-encodes it for `to`.
///
/// The result is a canonical encoding of the decoded packet, so a well-formed
/// input comes out byte-identical.
pub fn translate(bytes: &[u8], from: Framing, to: Framing) -> Result<Vec<u8>, DecodeError> {
    let packet = decode_packet(bytes, from)?;
    debug!("relaying {from} -> {to}: {packet}");
    Ok(encode_packet(&packet, to))
}

/// Relays every UDP datagram to all WebSocket clients.
///
/// Runs until the UDP transport's inbound channel closes.
pub async fn forward_udp_to_ws(
    mut inbound: mpsc::Receiver<UdpDatagram>,
    ws: Arc<WsTransport>,
    stats: Arc<RelayStats>,
) {
    while let Some(datagram) = inbound.recv().await {
        let frame = match translate(&datagram.bytes, Framing::Datagram, Framing::WebSocket) {
            Ok(frame) => frame,
            Err(e) => {
                RelayStats::bump(&stats.decode_errors);
                warn!("dropping packet from {}: {e}", Endpoint::Udp(datagram.source));
                continue;
            }
        };

        let delivered = ws.broadcast(&frame);
        RelayStats::bump(&stats.udp_to_ws);
        debug!("datagram from {} broadcast to {delivered} WebSocket clients", datagram.source);
    }
    debug!("UDP to WebSocket forwarder finished");
}

/// Relays every WebSocket frame to the most recent UDP sender.
///
/// When no live peer is known (none seen yet, or the last one went idle) the
/// frame goes to `fallback`; without one it is dropped.  Runs until the
/// WebSocket transport's inbound channel closes.
pub async fn forward_ws_to_udp(
    mut inbound: mpsc::Receiver<WsFrame>,
    udp: Arc<UdpTransport>,
    fallback: Option<SocketAddr>,
    stats: Arc<RelayStats>,
) {
    while let Some(frame) = inbound.recv().await {
        let datagram = match translate(&frame.bytes, Framing::WebSocket, Framing::Datagram) {
            Ok(datagram) => datagram,
            Err(e) => {
                RelayStats::bump(&stats.decode_errors);
                warn!("dropping packet from {}: {e}", Endpoint::WebSocket(frame.connection));
                continue;
            }
        };

        let Some(peer) = resolve_destination(udp.last_peer(), fallback) else {
            RelayStats::bump(&stats.dropped_no_peer);
            warn!(
                "no UDP peer known and no target configured; dropping packet from {}",
                Endpoint::WebSocket(frame.connection)
            );
            continue;
        };

        match udp.send(&datagram, peer).await {
            Ok(_) => RelayStats::bump(&stats.ws_to_udp),
            Err(e) => warn!("relay to {} failed: {e}", Endpoint::Udp(peer)),
        }
    }
    debug!("WebSocket to UDP forwarder finished");
}

/// Picks the UDP destination: the live peer first, then the configured target.
fn resolve_destination(
    live_peer: Option<SocketAddr>,
    fallback: Option<SocketAddr>,
) -> Option<SocketAddr> {
    live_peer.or(fallback)
}
