//! Transport and connector traits.
//!
//! The [`Transport`] trait abstracts over the byte stream to a controller.
//! The TCP/telnet implementation lives in `qtpro-transport`; mock
//! implementations for testing live in `qtpro-test-harness`.
//!
//! Because the controller reconnects after every close, it never holds a
//! transport directly. It holds a [`Connector`] and asks it for a fresh
//! transport on each attempt.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a controller.
///
/// Implementations handle buffering and error recovery at the physical
/// layer. Framing (carriage-return line endings, wait-for patterns) is
/// handled by the IO task that consumes this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the controller.
    ///
    /// Implementations should block until all bytes have been written to
    /// the underlying socket.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the controller into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Will wait up to `timeout`
    /// for data to arrive; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if no data is received within the deadline and
    /// [`Error::ConnectionLost`](crate::error::Error::ConnectionLost) if the
    /// peer closed the stream. Must be cancel-safe: dropping the future
    /// loses no bytes.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}

/// Opens new [`Transport`]s to one controller.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh transport. Each call is an independent attempt.
    async fn connect(&self) -> Result<Box<dyn Transport>>;

    /// Label used in log output (typically `host:port`).
    fn describe(&self) -> String;
}
