//! Domain layer for osc-relay.
//!
//! The domain layer contains plain data types shared by the other layers.
//! Nothing here opens a socket, spawns a task, or reads the environment.
//!
//! # What belongs in the domain layer?
//!
//! - Configuration structures
//! - Endpoint identities (UDP addresses, WebSocket connection handles)
//! - Lifecycle states and the health report

pub mod config;
pub mod endpoint;
pub mod status;

pub use config::BridgeConfig;
pub use endpoint::{ConnectionId, Endpoint};
pub use status::{BridgeStatus, LifecycleState, RelayCounters};
