//! QtPro -- the device facade.
//!
//! [`QtPro`] validates requests against the parameter tables and the
//! model's zone count, encodes them with the [`codec`](crate::codec),
//! submits them through the [`Controller`] and decodes the replies.
//! Validation failures never reach the wire.
//!
//! All methods are `&self`; requests issued concurrently from several tasks
//! are serialized by the controller's queue and complete in the order they
//! were submitted.

use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::debug;

use qtpro_core::error::{Error, Result};
use qtpro_core::events::DeviceEvent;
use qtpro_core::types::{ConnectionState, Direction, Scope};

use crate::api;
use crate::codec::{self, ParsedResponse};
use crate::controller::Controller;
use crate::models::QtProModel;

/// A Qt Pro controller reached through one managed connection.
///
/// Constructed via [`QtProBuilder`](crate::builder::QtProBuilder). Dropping
/// it closes the connection and stops the reconnect loop.
pub struct QtPro {
    model: QtProModel,
    address: String,
    controller: Controller,
}

impl QtPro {
    pub(crate) fn new(model: QtProModel, address: String, controller: Controller) -> Self {
        QtPro {
            model,
            address,
            controller,
        }
    }

    /// The configured model.
    pub fn model(&self) -> &QtProModel {
        &self.model
    }

    /// Where the controller is reached (`host:port`).
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.controller.state()
    }

    /// Watch channel following the connection state.
    ///
    /// Errors are reported through [`subscribe`](Self::subscribe); the
    /// state itself passes from `Error` to `Disconnected` at once.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.controller.watch_state()
    }

    /// Subscribe to lifecycle events (connecting, ready, disconnected,
    /// errors, reconnect attempts).
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.controller.subscribe()
    }

    /// Start connecting. A no-op while connecting or connected.
    pub fn connect(&self) {
        self.controller.connect();
    }

    /// Close the connection. No reconnect is attempted until
    /// [`connect`](Self::connect) is called again.
    pub async fn close(&self) {
        self.controller.close().await;
    }

    /// Wait until commands can flow.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        self.controller.wait_ready(timeout).await
    }

    // -----------------------------------------------------------------------
    // Generic operations
    // -----------------------------------------------------------------------

    /// Read one parameter.
    ///
    /// Returns the decoded reply, normally a single `name -> value` entry.
    pub async fn get_parameter(
        &self,
        scope: Scope,
        parameter: &str,
        zone: Option<u8>,
    ) -> Result<ParsedResponse> {
        let zone = self.validate(scope, Direction::Get, parameter, zone)?;
        let command = codec::encode(scope, Direction::Get, parameter, zone, None)?;
        let reply = self.controller.request(command).await?;
        decode_reply(
            &reply,
            codec::response_header(scope, Direction::Get),
            api::table(scope, Direction::Get),
        )
    }

    /// Write one parameter.
    ///
    /// Returns `Ok(true)` when the device echoed back exactly `value`, and
    /// `Ok(false)` when it acknowledged with a different value.
    pub async fn set_parameter(
        &self,
        scope: Scope,
        parameter: &str,
        value: &str,
        zone: Option<u8>,
    ) -> Result<bool> {
        let zone = self.validate(scope, Direction::Set, parameter, zone)?;
        let command = codec::encode(scope, Direction::Set, parameter, zone, Some(value))?;
        let reply = self.controller.request(command).await?;
        let parsed = decode_reply(
            &reply,
            codec::response_header(scope, Direction::Set),
            api::table(scope, Direction::Set),
        )?;
        let confirmed = parsed.get(parameter).map(String::as_str) == Some(value);
        if !confirmed {
            debug!(
                parameter,
                requested = value,
                echoed = ?parsed.get(parameter),
                "set not confirmed"
            );
        }
        Ok(confirmed)
    }

    /// Read every parameter of a scope in one request.
    ///
    /// Fields the device reports that are not in the get table are dropped.
    pub async fn get_all_parameters(
        &self,
        scope: Scope,
        zone: Option<u8>,
    ) -> Result<ParsedResponse> {
        let zone = self.check_zone(scope, zone)?;
        let command = codec::encode_all(scope, zone)?;
        let reply = self.controller.request(command).await?;
        decode_reply(
            &reply,
            &codec::all_response_header(scope, zone),
            api::table(scope, Direction::Get),
        )
    }

    /// Reset the controller. Returns `Ok(true)` if it acknowledged.
    pub async fn reset(&self) -> Result<bool> {
        let reply = self.controller.request(api::RESET_COMMAND).await?;
        let acknowledged = codec::ack_matches(&reply, api::RESET_COMMAND);
        if !acknowledged {
            tracing::warn!(reply = ?reply, "reset not acknowledged");
        }
        Ok(acknowledged)
    }

    // -----------------------------------------------------------------------
    // Conveniences
    // -----------------------------------------------------------------------

    /// Read one system parameter and return its value.
    pub async fn get_system_param(&self, parameter: &str) -> Result<Option<String>> {
        let mut parsed = self.get_parameter(Scope::System, parameter, None).await?;
        Ok(parsed.remove(parameter))
    }

    /// Write one system parameter.
    pub async fn set_system_param(&self, parameter: &str, value: &str) -> Result<bool> {
        self.set_parameter(Scope::System, parameter, value, None).await
    }

    /// Read one zone parameter and return its value.
    pub async fn get_zone_param(&self, zone: u8, parameter: &str) -> Result<Option<String>> {
        let mut parsed = self.get_parameter(Scope::Zone, parameter, Some(zone)).await?;
        Ok(parsed.remove(parameter))
    }

    /// Write one zone parameter.
    pub async fn set_zone_param(&self, zone: u8, parameter: &str, value: &str) -> Result<bool> {
        self.set_parameter(Scope::Zone, parameter, value, Some(zone)).await
    }

    /// Read every system parameter.
    pub async fn get_all_system_params(&self) -> Result<ParsedResponse> {
        self.get_all_parameters(Scope::System, None).await
    }

    /// Read every parameter of one zone.
    pub async fn get_all_zone_params(&self, zone: u8) -> Result<ParsedResponse> {
        self.get_all_parameters(Scope::Zone, Some(zone)).await
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    fn validate(
        &self,
        scope: Scope,
        direction: Direction,
        parameter: &str,
        zone: Option<u8>,
    ) -> Result<Option<u8>> {
        if !api::table(scope, direction).contains(parameter) {
            return Err(Error::UnknownParameter {
                scope,
                direction,
                name: parameter.to_string(),
            });
        }
        self.check_zone(scope, zone)
    }

    /// The zone index to put on the wire for `scope`.
    fn check_zone(&self, scope: Scope, zone: Option<u8>) -> Result<Option<u8>> {
        match scope {
            Scope::System => {
                if let Some(zone) = zone {
                    debug!(zone, "zone index ignored for system request");
                }
                Ok(None)
            }
            Scope::Zone => {
                let zone = zone.ok_or(Error::MissingZone)?;
                if !self.model.has_zone(zone) {
                    return Err(Error::ZoneOutOfRange {
                        zone,
                        num_zones: self.model.num_zones,
                    });
                }
                Ok(Some(zone))
            }
        }
    }
}

fn decode_reply(reply: &str, header: &str, table: &api::ParameterTable) -> Result<ParsedResponse> {
    codec::decode(reply, header, table).ok_or_else(|| {
        debug!(reply = ?reply, header, "reply did not match");
        Error::NoMatch(reply.to_string())
    })
}
