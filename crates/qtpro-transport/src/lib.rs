//! Transport implementations for the Qt Pro client.
//!
//! This crate provides the concrete [`Transport`](qtpro_core::Transport)
//! used to talk to a controller over the network:
//!
//! - [`TcpTransport`]: a TCP stream to the controller's telnet port, with
//!   telnet option negotiation refused and stripped from the data stream
//! - [`TcpConnector`]: a [`Connector`](qtpro_core::Connector) that opens a
//!   fresh `TcpTransport` on every connect attempt
//!
//! # Example
//!
//! ```no_run
//! use qtpro_transport::TcpTransport;
//! use qtpro_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> qtpro_core::Result<()> {
//! let mut transport = TcpTransport::connect("172.16.10.141:23").await?;
//!
//! // Ask for the unit's IP address
//! transport.send(b"CSGET,IPAD\r").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(2)).await?;
//! # Ok(())
//! # }
//! ```

pub mod tcp;
pub mod telnet;

pub use tcp::{TcpConnector, TcpTransport};
pub use telnet::TelnetFilter;
