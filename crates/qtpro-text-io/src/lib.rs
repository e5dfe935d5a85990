//! Shared IO machinery for the Qt Pro text protocol.
//!
//! The controller speaks carriage-return-terminated ASCII commands and
//! answers with `{...}\r\n` replies. This crate provides the pieces that
//! sit between the device facade and the raw [`Transport`](qtpro_core::Transport):
//!
//! # Architecture
//!
//! - [`protocol`] -- framing helpers: command line endings, wait-for
//!   pattern search, text decoding
//! - [`queue`] -- the FIFO [`RequestQueue`](queue::RequestQueue) enforcing at
//!   most one outstanding exchange
//! - [`io`] -- the per-connection IO task that owns the transport, runs one
//!   send-and-wait exchange at a time, and watches for idle timeout and
//!   peer close between exchanges

pub mod io;
pub mod protocol;
pub mod queue;
