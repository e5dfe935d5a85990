//! Error types for the Qt Pro client.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Local validation failures, protocol
//! decode failures, and transport failures are all captured here.

use crate::types::{Direction, Scope};

/// The error type for all Qt Pro operations.
///
/// Validation variants ([`UnknownParameter`](Error::UnknownParameter),
/// [`MissingZone`](Error::MissingZone), [`ZoneOutOfRange`](Error::ZoneOutOfRange))
/// are raised locally and never reach the wire. Transport variants fail the
/// affected request and drive the reconnect logic in the controller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (TCP socket, telnet stream).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (oversized reply, undecodable bytes).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection went idle for longer than the idle timeout.
    #[error("timeout waiting for response")]
    Timeout,

    /// The parameter name is not present in the table for this scope and
    /// direction.
    #[error("unknown {scope} {direction} parameter: {name}")]
    UnknownParameter {
        scope: Scope,
        direction: Direction,
        name: String,
    },

    /// A zone-scoped request was made without a zone index.
    #[error("zone index required for zone parameters")]
    MissingZone,

    /// The zone index is not valid for the configured model.
    #[error("zone {zone} out of range (model has {num_zones} zones)")]
    ZoneOutOfRange { zone: u8, num_zones: u8 },

    /// A reply did not match the expected `{<header>...}` shape.
    ///
    /// The connection stays up; the raw reply is carried for diagnostics.
    #[error("unparseable response: {0:?}")]
    NoMatch(String),

    /// An invalid parameter was passed to a builder or command.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No connection to the controller has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the controller was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// The connection was closed (explicitly, or with reconnect disabled)
    /// while the request was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("connection refused".into());
        assert_eq!(e.to_string(), "transport error: connection refused");
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for response");
    }

    #[test]
    fn error_display_unknown_parameter() {
        let e = Error::UnknownParameter {
            scope: Scope::Zone,
            direction: Direction::Set,
            name: "volume_knob".into(),
        };
        assert_eq!(e.to_string(), "unknown zone set parameter: volume_knob");
    }

    #[test]
    fn error_display_zone_out_of_range() {
        let e = Error::ZoneOutOfRange {
            zone: 3,
            num_zones: 3,
        };
        assert_eq!(e.to_string(), "zone 3 out of range (model has 3 zones)");
    }

    #[test]
    fn error_display_no_match() {
        let e = Error::NoMatch("{NAK}\r\n".into());
        assert_eq!(e.to_string(), "unparseable response: \"{NAK}\\r\\n\"");
    }

    #[test]
    fn error_display_connection_closed() {
        assert_eq!(Error::ConnectionClosed.to_string(), "connection closed");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
