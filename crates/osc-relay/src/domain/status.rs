//! Lifecycle states and the health report.

use std::fmt;
use std::net::SocketAddr;

use serde::Serialize;

/// Lifecycle of the bridge instance owned by the controller.
///
/// ```text
/// Stopped ──start──▶ Starting ──ok──▶ Running
///                        │
///                        └──bind error──▶ Failed
/// Running / Failed ──stop or replacement start──▶ Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Stopped,
    Starting,
    Running,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Packet counters for one bridge instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RelayCounters {
    /// UDP packets re-encoded and broadcast to WebSocket clients.
    pub udp_to_ws: u64,
    /// WebSocket packets re-encoded and sent to the UDP peer.
    pub ws_to_udp: u64,
    /// Packets dropped because they failed to decode.
    pub decode_errors: u64,
    /// WebSocket packets dropped because no UDP peer had been seen.
    pub dropped_no_peer: u64,
}

/// Point-in-time health report.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BridgeStatus {
    pub state: LifecycleState,
    /// Bound UDP address while an instance is running.
    pub udp_addr: Option<SocketAddr>,
    /// Bound WebSocket listen address while an instance is running.
    pub ws_addr: Option<SocketAddr>,
    pub ws_clients: usize,
    /// Current reply-to UDP endpoint, if one is known and not idle.
    pub last_udp_peer: Option<SocketAddr>,
    pub counters: RelayCounters,
}
