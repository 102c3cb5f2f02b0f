//! Application layer for osc-relay.
//!
//! The application layer decides *what* happens to each packet and when the
//! transports exist; the infrastructure layer does the I/O.
//!
//! # Responsibilities
//!
//! - Owning the bridge lifecycle (`start`, `stop`, `status`)
//! - Decoding packets from one transport and re-encoding them for the other
//! - Validating operator input before it reaches the controller
//!
//! # What does NOT belong here?
//!
//! - Binding sockets or accepting connections (that is infrastructure)
//! - OSC wire details (that is `osc-relay-core`)

pub mod control;
pub mod controller;
pub mod forwarding;

pub use control::{
    execute, handle_start, parse_port, Command, ControlError, ControlReply, ControlResponse,
    MAX_PORT, MIN_PORT,
};
pub use controller::BridgeController;
pub use forwarding::{translate, RelayStats};
