//! QtProBuilder -- fluent builder for constructing [`QtPro`] instances.
//!
//! Separates configuration from construction so that callers can set up
//! the address, keepalive and reconnect policy before the controller task
//! starts. Building starts the first connection attempt immediately.
//!
//! # Example
//!
//! ```no_run
//! use qtpro::builder::QtProBuilder;
//! use qtpro::models::qt_300;
//! use std::time::Duration;
//!
//! # async fn example() -> qtpro_core::Result<()> {
//! let qt = QtProBuilder::new(qt_300())
//!     .address("172.16.10.141")
//!     .reconnect_delay(Duration::from_secs(5))
//!     .build()
//!     .await?;
//! qt.wait_ready(Duration::from_secs(15)).await?;
//! let level = qt.get_zone_param(0, "masking_level").await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use qtpro_core::error::{Error, Result};
use qtpro_core::transport::Connector;
use qtpro_transport::tcp::{TcpConnector, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT};

use crate::controller::{
    Controller, ControllerConfig, DEFAULT_KEEPALIVE, DEFAULT_RECONNECT_DELAY, DEFAULT_SETTLE_DELAY,
};
use crate::device::QtPro;
use crate::models::QtProModel;

/// Fluent builder for [`QtPro`].
///
/// Every setting has a default, so the simplest usage is:
///
/// ```ignore
/// let qt = QtProBuilder::new(qt_600())
///     .address("10.0.0.20")
///     .build()
///     .await?;
/// ```
pub struct QtProBuilder {
    model: QtProModel,
    address: Option<String>,
    port: u16,
    reconnect: bool,
    reconnect_delay: Duration,
    keepalive_interval: Duration,
    idle_timeout: Option<Duration>,
    settle_delay: Duration,
    connect_timeout: Duration,
}

impl QtProBuilder {
    /// Create a new builder for the given model.
    pub fn new(model: QtProModel) -> Self {
        QtProBuilder {
            model,
            address: None,
            port: DEFAULT_PORT,
            reconnect: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            keepalive_interval: DEFAULT_KEEPALIVE,
            idle_timeout: None,
            settle_delay: DEFAULT_SETTLE_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the controller's host name or IP address.
    pub fn address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }

    /// Override the telnet port (default: 23).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable or disable automatic reconnection (default: enabled).
    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.reconnect = enabled;
        self
    }

    /// Set the fixed delay before each reconnect attempt (default: 20s).
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the keepalive period (default: 10s).
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Set how long the link may stay silent before it is considered dead.
    ///
    /// Defaults to 1.2 times the keepalive interval.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set the pause between handshake and readiness (default: 100ms).
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the TCP connect timeout (default: 12s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The resolved controller settings.
    fn controller_config(&self) -> Result<ControllerConfig> {
        if self.keepalive_interval.is_zero() {
            return Err(Error::InvalidParameter(
                "keepalive_interval must be non-zero".into(),
            ));
        }
        let idle_timeout = self
            .idle_timeout
            .unwrap_or_else(|| self.keepalive_interval.mul_f64(1.2));
        if idle_timeout <= self.keepalive_interval {
            return Err(Error::InvalidParameter(
                "idle_timeout must be longer than keepalive_interval".into(),
            ));
        }
        Ok(ControllerConfig {
            keepalive_interval: self.keepalive_interval,
            idle_timeout,
            settle_delay: self.settle_delay,
            reconnect: self.reconnect,
            reconnect_delay: self.reconnect_delay,
            ..ControllerConfig::default()
        })
    }

    /// Build a [`QtPro`] with a caller-provided connector.
    ///
    /// This is the primary entry point for testing (pass a `MockConnector`
    /// from `qtpro-test-harness`). The first connection attempt starts
    /// before this returns.
    pub async fn build_with_connector(self, connector: Arc<dyn Connector>) -> Result<QtPro> {
        let config = self.controller_config()?;
        let address = self
            .address
            .as_ref()
            .map(|host| format!("{host}:{}", self.port))
            .unwrap_or_else(|| connector.describe());
        let controller = Controller::spawn(connector, config);
        controller.connect();
        Ok(QtPro::new(self.model, address, controller))
    }

    /// Build a [`QtPro`] that connects over TCP.
    ///
    /// Requires that [`address()`](Self::address) has been called.
    pub async fn build(self) -> Result<QtPro> {
        let host = self
            .address
            .as_deref()
            .ok_or_else(|| Error::InvalidParameter("address is required for build()".into()))?;
        if host.is_empty() {
            return Err(Error::InvalidParameter("address must not be empty".into()));
        }
        let connector = TcpConnector::new(host, self.port, self.connect_timeout);
        self.build_with_connector(Arc::new(connector)).await
    }
}
