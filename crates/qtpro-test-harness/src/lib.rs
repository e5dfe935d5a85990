//! qtpro-test-harness: Test utilities and mock transports for the Qt Pro
//! client.
//!
//! This crate provides [`MockTransport`] for deterministic unit testing of
//! the IO task and controller without a real device, [`MockConnector`] for
//! scripting connect and reconnect attempts, and [`MockTcpServer`] for
//! end-to-end tests over TCP.

pub mod mock_connector;
pub mod mock_tcp;
pub mod mock_transport;

pub use mock_connector::MockConnector;
pub use mock_tcp::{MockTcpServer, SessionReport};
pub use mock_transport::{MockHandle, MockTransport};
