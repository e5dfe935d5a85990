//! Core types used throughout the Qt Pro client.
//!
//! These describe which parameter table a request addresses
//! ([`Scope`] × [`Direction`]) and the lifecycle of the single connection
//! to a controller ([`ConnectionState`]).

use std::fmt;
use std::str::FromStr;

/// Which part of the controller a parameter belongs to.
///
/// System parameters describe the unit as a whole (network settings,
/// firmware, unit name). Zone parameters are per-zone and always carry a
/// zone index on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    System,
    Zone,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::System => write!(f, "system"),
            Scope::Zone => write!(f, "zone"),
        }
    }
}

/// Error returned when a string cannot be parsed into a [`Scope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseScopeError(String);

impl fmt::Display for ParseScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown scope: {}", self.0)
    }
}

impl std::error::Error for ParseScopeError {}

impl FromStr for Scope {
    type Err = ParseScopeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" | "sys" => Ok(Scope::System),
            "zone" => Ok(Scope::Zone),
            _ => Err(ParseScopeError(s.to_string())),
        }
    }
}

/// Whether a request reads or writes a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Get,
    Set,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Get => write!(f, "get"),
            Direction::Set => write!(f, "set"),
        }
    }
}

/// Lifecycle state of the connection to a controller.
///
/// Exactly one instance exists per device; it is owned and mutated by the
/// connection controller and published to readers through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No transport is open. A reconnect may be scheduled.
    #[default]
    Disconnected,
    /// A transport is being opened, or the handshake / settle delay is
    /// still running. Requests queue but are not dispatched.
    Connecting,
    /// Commands may flow.
    Ready,
    /// The transport reported an error. The controller moves on to
    /// `Disconnected` in the same step, so this state is transient; the
    /// failure itself is reported as `DeviceEvent::Error`.
    Error,
}

impl ConnectionState {
    /// Whether a connection attempt is underway or established.
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Ready)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Error => "error",
        };
        write!(f, "{s}")
    }
}
