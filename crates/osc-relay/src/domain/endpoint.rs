//! Transport-level peer identities.

use std::fmt;
use std::net::SocketAddr;

use serde::Serialize;
use uuid::Uuid;

/// Handle for one accepted WebSocket connection.
///
/// A fresh handle is minted per connection, so a client that reconnects from
/// the same address is a different endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first UUID group is plenty to tell connections apart in logs.
        let s = self.0.to_string();
        f.write_str(&s[..8])
    }
}

/// Where a packet came from (used for logging drops).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Udp(SocketAddr),
    WebSocket(ConnectionId),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Udp(addr) => write!(f, "udp:{addr}"),
            Endpoint::WebSocket(id) => write!(f, "ws:{id}"),
        }
    }
}
