//! qtpro-core: Core traits, types, and error definitions for the Qt Pro client.
//!
//! This crate defines the transport-agnostic abstractions shared by the
//! protocol engine, the transports, and the test harness. Applications
//! normally depend on the `qtpro` crate, which re-exports everything here.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel to one controller
//! - [`Connector`] -- factory for fresh transports (used on reconnect)
//! - [`DeviceEvent`] -- lifecycle notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use qtpro_core::*`.
pub use error::{Error, Result};
pub use events::DeviceEvent;
pub use transport::{Connector, Transport};
pub use types::*;
