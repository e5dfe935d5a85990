//! Asynchronous device lifecycle events.
//!
//! Events are emitted by the connection controller through a
//! `tokio::sync::broadcast` channel as the link to the controller rises
//! and falls. Subscribe via `QtPro::subscribe()`.

use std::time::Duration;

/// A lifecycle notification from the connection controller.
///
/// Events are delivered on a best-effort basis through a bounded broadcast
/// channel; slow consumers may miss events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A connection attempt has started.
    Connecting,

    /// The handshake and settle delay completed; commands may flow.
    Ready,

    /// The connection closed (peer close, idle timeout, error, or an
    /// explicit `close()`).
    Disconnected,

    /// The transport reported an error. A `Disconnected` event follows.
    Error {
        /// Human-readable description of the failure.
        message: String,
    },

    /// A reconnect attempt has been scheduled.
    Reconnecting {
        /// The reconnection attempt number (1-based).
        attempt: u32,
        /// Delay before the attempt starts.
        delay: Duration,
    },
}
