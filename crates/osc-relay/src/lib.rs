//! osc-relay library crate.
//!
//! This crate bridges OSC traffic between UDP peers (hardware controllers,
//! audio software, embedded devices) and WebSocket clients (browsers).
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! UDP peers (one OSC packet per datagram)
//!         ↕
//! [osc-relay]
//!   ├── domain/           Pure types: BridgeConfig, endpoints, status reports
//!   ├── application/      Controller lifecycle, forwarding, control surface
//!   └── infrastructure/
//!         ├── udp_transport/ UDP socket, last-seen peer tracking
//!         └── ws_transport/  WebSocket accept loop (tokio-tungstenite)
//!         ↕
//! WebSocket clients (one OSC packet per binary frame)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain`, `infrastructure` and `osc-relay-core`;
//!   it decides *what* is forwarded where.
//! - `infrastructure` owns every socket and task; it knows nothing about the
//!   other transport.

/// Domain layer: pure types (no I/O).
pub mod domain;

/// Application layer: bridge lifecycle and packet forwarding.
pub mod application;

/// Infrastructure layer: UDP and WebSocket transports.
pub mod infrastructure;

pub use application::{BridgeController, ControlResponse};
pub use domain::{BridgeConfig, BridgeStatus, LifecycleState};
