//! Bridge configuration types.
//!
//! [`BridgeConfig`] holds every runtime setting except the UDP port, which is
//! chosen per `start` call.  It is built once at startup (from CLI arguments
//! or defaults) and handed to the controller, which keeps it for the lifetime
//! of the process.  Nothing is persisted.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Well-known WebSocket port browsers connect to.
pub const DEFAULT_WS_PORT: u16 = 8081;

/// Largest datagram the UDP transport will receive (the UDP payload limit).
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

/// All runtime configuration for the relay.
///
/// # Example
///
/// ```rust
/// use osc_relay::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.ws_bind_addr.port(), 8081);
/// assert!(cfg.peer_idle_timeout.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address the WebSocket listener binds to.
    ///
    /// This stays the same across restarts; only the UDP port changes with
    /// each `start`.
    pub ws_bind_addr: SocketAddr,

    /// How long the last-seen UDP sender stays the reply target.
    ///
    /// UDP has no close, so a peer that went away would otherwise remain the
    /// destination forever.  `None` keeps the last peer until a new one
    /// appears or the bridge restarts.
    pub peer_idle_timeout: Option<Duration>,

    /// Fixed UDP destination for WebSocket traffic when no live peer is known.
    ///
    /// A live last-seen sender always takes precedence; this address is used
    /// only before the first UDP datagram arrives or after the peer has gone
    /// idle.  `None` drops WebSocket packets in those windows.
    pub udp_target: Option<SocketAddr>,

    /// Receive buffer size for one datagram.
    pub max_datagram_size: usize,

    /// Capacity of each transport's inbound channel to the controller.
    pub inbound_capacity: usize,

    /// Frames that may be queued for one WebSocket client before further
    /// broadcasts to it are dropped.
    pub client_queue_depth: usize,

    /// How long WebSocket connections get to exchange Close frames when the
    /// transport shuts down, before their tasks are aborted.
    pub close_grace: Duration,
}

impl Default for BridgeConfig {
    /// | Field              | Default         |
    /// |--------------------|-----------------|
    /// | ws_bind_addr       | `0.0.0.0:8081`  |
    /// | peer_idle_timeout  | disabled        |
    /// | udp_target         | none            |
    /// | max_datagram_size  | 65 536 bytes    |
    /// | inbound_capacity   | 1024 packets    |
    /// | client_queue_depth | 256 frames      |
    /// | close_grace        | 500 ms          |
    fn default() -> Self {
        Self {
            ws_bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_WS_PORT)),
            peer_idle_timeout: None,
            udp_target: None,
            max_datagram_size: MAX_DATAGRAM_SIZE,
            inbound_capacity: 1024,
            client_queue_depth: 256,
            close_grace: Duration::from_millis(500),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
