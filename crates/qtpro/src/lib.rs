//! Async client for Cambridge Sound Management Qt Pro sound-masking
//! controllers.
//!
//! Qt Pro units are configured over a telnet-style TCP connection with
//! short ASCII commands (`CZGET,MAXM1\r`) answered by bracketed replies
//! (`{CZGET,MAXM1=12}\r\n`). This crate provides:
//!
//! - **Parameter tables** ([`api`]) -- semantic parameter names mapped to
//!   the device's four-letter mnemonics, per scope and direction.
//! - **Protocol codec** ([`codec`]) -- build command lines and decode
//!   replies back into `name -> value` maps.
//! - **Model definitions** ([`models`]) -- zone counts for the Qt Pro 300
//!   and Qt Pro 600.
//! - **Connection controller** ([`controller`]) -- the task that owns the
//!   connection: handshake, keepalive, idle detection, reconnect, and the
//!   single-flight request queue.
//! - **Device facade** ([`device`]) -- [`QtPro`], with validated get/set
//!   operations for system and zone parameters.
//! - **Builder** ([`builder`]) -- [`QtProBuilder`] for constructing a
//!   [`QtPro`] with sensible defaults.
//!
//! # Example
//!
//! ```
//! use qtpro::codec::{decode, encode};
//! use qtpro::api;
//! use qtpro_core::types::{Direction, Scope};
//!
//! // Build a "read masking max of zone 1" command
//! let cmd = encode(Scope::Zone, Direction::Get, "masking_max", Some(1), None).unwrap();
//! assert_eq!(cmd, "CZGET,MAXM1");
//!
//! // Decode the device's answer
//! let parsed = decode("{CZGET,MAXM1=12}\r\n", "CZGET,", &api::ZONE_GET).unwrap();
//! assert_eq!(parsed["masking_max"], "12");
//! ```

pub mod api;
pub mod builder;
pub mod codec;
pub mod controller;
pub mod device;
pub mod models;

pub use builder::QtProBuilder;
pub use codec::ParsedResponse;
pub use controller::{Controller, ControllerConfig};
pub use device::QtPro;
pub use models::QtProModel;

pub use qtpro_core::{ConnectionState, DeviceEvent, Direction, Error, Result, Scope};
