//! Operator control surface.
//!
//! The controller only checks whether a port can be bound.  This module is
//! the policy layer in front of it: it validates user-supplied port strings,
//! maps lifecycle results to status-coded replies, and parses the line
//! commands the binary reads from stdin.

use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::application::controller::BridgeController;
use crate::domain::BridgeStatus;

/// Lowest UDP port an operator may start the relay on.
pub const MIN_PORT: u16 = 8000;
/// Highest UDP port an operator may start the relay on.
pub const MAX_PORT: u16 = 11000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("{0:?} is not a port number")]
    NotANumber(String),

    #[error("port {0} is outside {MIN_PORT}-{MAX_PORT}")]
    OutOfRange(i64),

    #[error("unknown command {0:?}")]
    UnknownCommand(String),
}

/// Parses an operator-supplied port and checks it against the accepted range.
///
/// Surrounding whitespace is ignored.  Only whole decimal numbers are
/// accepted.
pub fn parse_port(raw: &str) -> Result<u16, ControlError> {
    let trimmed = raw.trim();
    let number: i64 = trimmed
        .parse()
        .map_err(|_| ControlError::NotANumber(trimmed.to_string()))?;
    if !(i64::from(MIN_PORT)..=i64::from(MAX_PORT)).contains(&number) {
        return Err(ControlError::OutOfRange(number));
    }
    u16::try_from(number).map_err(|_| ControlError::OutOfRange(number))
}

/// Status-coded reply to a start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlResponse {
    pub status: u16,
    pub message: String,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: 200,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            message: message.into(),
        }
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self {
            status: 500,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Validates `raw` and, if it is an accepted port, starts the relay on it.
///
/// An invalid port is answered with 400 without touching the controller.
pub async fn handle_start(controller: &BridgeController, raw: &str) -> ControlResponse {
    let port = match parse_port(raw) {
        Ok(port) => port,
        Err(e) => {
            tracing::warn!("rejected start request: {e}");
            return ControlResponse::bad_request("Invalid port number");
        }
    };

    if controller.start(port).await {
        ControlResponse::ok(format!("Success starting OSC Bridge on {port}"))
    } else {
        ControlResponse::server_error(format!("Error starting OSC Bridge on {port}"))
    }
}

/// One line of operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `start <port>`; the port is validated by [`handle_start`].
    Start(String),
    Stop,
    Status,
    Quit,
}

impl FromStr for Command {
    type Err = ControlError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let rest: Vec<&str> = words.collect();

        match (verb.to_ascii_lowercase().as_str(), rest.as_slice()) {
            ("start", [port]) => Ok(Command::Start((*port).to_string())),
            ("start", []) => Ok(Command::Start(String::new())),
            ("stop", []) => Ok(Command::Stop),
            ("status", []) => Ok(Command::Status),
            ("quit" | "exit", []) => Ok(Command::Quit),
            _ => Err(ControlError::UnknownCommand(line.trim().to_string())),
        }
    }
}

/// Reply to one [`Command`], printed as one JSON line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ControlReply {
    Response(ControlResponse),
    Status(BridgeStatus),
}

/// Runs `command` against `controller`.
///
/// `Quit` is left to the caller, which also owns shutdown; here it reports
/// the final status.
pub async fn execute(controller: &BridgeController, command: Command) -> ControlReply {
    match command {
        Command::Start(raw) => ControlReply::Response(handle_start(controller, &raw).await),
        Command::Stop => {
            controller.stop().await;
            ControlReply::Response(ControlResponse::ok("OSC Bridge stopped"))
        }
        Command::Status | Command::Quit => ControlReply::Status(controller.status().await),
    }
}
