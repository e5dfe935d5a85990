//! Connection controller -- the state machine owning one device connection.
//!
//! A single tokio task owns everything mutable about the connection: the
//! [`RequestQueue`], the [`ConnectionState`], the current link's IO task,
//! the keepalive timer, the settle deadline and the reconnect deadline.
//! Callers talk to it through a [`Controller`] handle; state changes are
//! published on a watch channel and lifecycle events on a broadcast
//! channel.
//!
//! ```text
//!  Disconnected --connect()--> Connecting --handshake + settle--> Ready
//!       ^                          |                                |
//!       +------- close / timeout / error (reconnect after delay) ---+
//! ```
//!
//! On each new link the controller sends an empty probe and waits for the
//! device's `{NAK}` marker, which flushes whatever the device left in its
//! receive buffer while booting. It then starts the keepalive timer and,
//! after a short settle delay, marks the connection ready. Queued requests
//! are only dispatched while the connection is ready.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use qtpro_core::error::{Error, Result};
use qtpro_core::events::DeviceEvent;
use qtpro_core::transport::{Connector, Transport};
use qtpro_core::types::ConnectionState;
use qtpro_text_io::io::{spawn_io_task, IoConfig, LinkExit, LinkIo};
use qtpro_text_io::protocol;
use qtpro_text_io::queue::{PendingRequest, RequestQueue};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Default keepalive period.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(10);
/// Default delay between a close and the next connect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(20);
/// Default pause between the handshake and readiness.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Marker the device sends in answer to the empty handshake probe.
pub const HANDSHAKE_MARKER: &[u8] = b"{NAK}\r\n";

/// Resolved settings for a [`Controller`].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Period of the empty keepalive command.
    pub keepalive_interval: Duration,
    /// Silence after which the link is considered dead.
    pub idle_timeout: Duration,
    /// Pause between a successful handshake and readiness.
    pub settle_delay: Duration,
    /// Whether to reconnect after the link drops.
    pub reconnect: bool,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Payload sent as handshake probe and keepalive.
    pub probe: &'static str,
    /// Pattern ending the handshake reply.
    pub handshake_marker: &'static [u8],
    /// Pattern ending every other reply.
    pub response_terminator: &'static [u8],
    /// Bytes appended to every outbound command.
    pub line_ending: &'static [u8],
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            keepalive_interval: DEFAULT_KEEPALIVE,
            idle_timeout: DEFAULT_KEEPALIVE.mul_f64(1.2),
            settle_delay: DEFAULT_SETTLE_DELAY,
            reconnect: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            probe: "",
            handshake_marker: HANDSHAKE_MARKER,
            response_terminator: protocol::RESPONSE_TERMINATOR,
            line_ending: protocol::LINE_ENDING,
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

enum Command {
    Submit {
        payload: String,
        reply: oneshot::Sender<Result<String>>,
    },
    Connect,
    Close {
        done: oneshot::Sender<()>,
    },
}

/// Reply to a submitted request, resolved when the device answers or the
/// request fails.
pub struct PendingReply {
    rx: oneshot::Receiver<Result<String>>,
}

impl PendingReply {
    /// Wait for the raw reply text.
    pub async fn recv(self) -> Result<String> {
        self.rx.await.unwrap_or(Err(Error::ConnectionClosed))
    }
}

/// Handle to a running controller task.
///
/// Dropping the handle stops the task, closes the connection and fails
/// anything still queued with [`Error::ConnectionClosed`].
pub struct Controller {
    tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    event_tx: broadcast::Sender<DeviceEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Controller {
    /// Spawn the controller task. No connection is attempted until
    /// [`connect`](Self::connect) is called.
    pub fn spawn(connector: Arc<dyn Connector>, config: ControllerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(64);
        let cancel = CancellationToken::new();

        let session = Session::new(connector, config, state_tx, event_tx.clone());
        let task = tokio::spawn(session.run(rx, cancel.clone()));

        Controller {
            tx,
            state_rx,
            event_tx,
            cancel,
            task,
        }
    }

    /// Queue a raw command. Never blocks; the reply arrives through the
    /// returned [`PendingReply`], in submission order relative to other
    /// requests.
    pub fn submit(&self, payload: impl Into<String>) -> PendingReply {
        let (reply, rx) = oneshot::channel();
        let command = Command::Submit {
            payload: payload.into(),
            reply,
        };
        if let Err(mpsc::error::SendError(Command::Submit { reply, .. })) = self.tx.send(command) {
            let _ = reply.send(Err(Error::ConnectionClosed));
        }
        PendingReply { rx }
    }

    /// Queue a raw command and wait for its reply.
    pub async fn request(&self, payload: impl Into<String>) -> Result<String> {
        self.submit(payload).recv().await
    }

    /// Start connecting. A no-op while connecting or connected.
    pub fn connect(&self) {
        let _ = self.tx.send(Command::Connect);
    }

    /// Close the connection without reconnecting. Pending requests fail
    /// with [`Error::ConnectionClosed`]. Returns once the transport is shut.
    pub async fn close(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(Command::Close { done }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch channel following the connection state.
    ///
    /// [`ConnectionState::Error`] is passed through on the way to
    /// `Disconnected` within one step, so a watcher normally only sees
    /// `Disconnected`. Failures are reported with their message as
    /// [`DeviceEvent::Error`] on [`subscribe`](Self::subscribe).
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_tx.subscribe()
    }

    /// Wait until the connection is ready, or fail with `Timeout` after
    /// `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let mut state_rx = self.state_rx.clone();
        // Release the watch borrow before the receiver goes out of scope.
        let waited = time::timeout(timeout, state_rx.wait_for(|s| *s == ConnectionState::Ready))
            .await
            .map(|ready| ready.is_ok());
        match waited {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::ConnectionClosed),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Whether the controller task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

type ConnectTask = JoinHandle<Result<Box<dyn Transport>>>;
type ReplySlot = Option<oneshot::Receiver<Result<String>>>;

struct Session {
    connector: Arc<dyn Connector>,
    config: ControllerConfig,
    queue: RequestQueue,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<DeviceEvent>,
    /// Connect attempt in progress.
    connecting: Option<ConnectTask>,
    /// IO task of the current link.
    link: Option<LinkIo>,
    /// Reply to the handshake probe.
    handshake: ReplySlot,
    /// Reply to the request in flight.
    in_flight: ReplySlot,
    settle_at: Option<Instant>,
    keepalive: Option<Interval>,
    reconnect_at: Option<Instant>,
    /// Set by an explicit close; cleared by the next connect.
    closed: bool,
    /// Consecutive reconnect attempts since the last ready.
    attempts: u32,
}

impl Session {
    fn new(
        connector: Arc<dyn Connector>,
        config: ControllerConfig,
        state_tx: watch::Sender<ConnectionState>,
        event_tx: broadcast::Sender<DeviceEvent>,
    ) -> Self {
        Session {
            connector,
            config,
            queue: RequestQueue::new(),
            state: ConnectionState::Disconnected,
            state_tx,
            event_tx,
            connecting: None,
            link: None,
            handshake: None,
            in_flight: None,
            settle_at: None,
            keepalive: None,
            reconnect_at: None,
            closed: false,
            attempts: 0,
        }
    }

    /// The main loop. Runs as a spawned Tokio task.
    ///
    /// Uses `tokio::select! { biased; }` to prioritize:
    /// 1. Cancellation
    /// 2. Caller commands
    /// 3. Reply to the in-flight request
    /// 4. Link lifecycle (handshake, connect result, link exit)
    /// 5. Timers (settle, keepalive, reconnect)
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        loop {
            self.dispatch();

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("controller cancelled");
                    self.close().await;
                    break;
                }

                cmd = rx.recv() => match cmd {
                    Some(Command::Submit { payload, reply }) => self.submit(payload, reply),
                    Some(Command::Connect) => self.connect(),
                    Some(Command::Close { done }) => {
                        self.close().await;
                        let _ = done.send(());
                    }
                    None => {
                        debug!("controller handle dropped");
                        self.close().await;
                        break;
                    }
                },

                reply = recv_reply(&mut self.in_flight) => {
                    self.in_flight = None;
                    match reply {
                        Some(result) => {
                            self.queue.complete(result);
                        }
                        // Dropped by the link before reaching the wire.
                        None => self.queue.requeue_in_flight(),
                    }
                }

                reply = recv_reply(&mut self.handshake) => {
                    self.handshake = None;
                    self.on_handshake(reply.unwrap_or(Err(Error::ConnectionLost)));
                }

                result = join_connect(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(result);
                }

                exit = wait_link(&mut self.link) => {
                    self.link = None;
                    self.on_link_exit(exit);
                }

                _ = sleep_until(self.settle_at) => {
                    self.settle_at = None;
                    self.on_settled();
                }

                _ = tick(&mut self.keepalive) => {
                    debug!("keepalive");
                    self.queue.submit(PendingRequest::detached(self.config.probe));
                }

                _ = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    if self.state == ConnectionState::Disconnected && !self.closed {
                        self.start_connect();
                    }
                }
            }
        }
    }

    // -- state -------------------------------------------------------------

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "connection state");
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    fn emit(&self, event: DeviceEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Whether a connection is expected soon enough that new requests
    /// should wait for it.
    fn accepting(&self) -> bool {
        !self.closed
            && (self.state.is_active()
                || self.connecting.is_some()
                || self.link.is_some()
                || self.reconnect_at.is_some())
    }

    // -- queue -------------------------------------------------------------

    fn submit(&mut self, payload: String, reply: oneshot::Sender<Result<String>>) {
        if self.accepting() {
            self.queue.submit(PendingRequest::new(payload, reply));
        } else {
            debug!(payload, "rejecting request, connection closed");
            let _ = reply.send(Err(Error::ConnectionClosed));
        }
    }

    /// Hand the head of the queue to the link if it is free.
    fn dispatch(&mut self) {
        if self.state != ConnectionState::Ready || self.in_flight.is_some() {
            return;
        }
        let Some(link) = self.link.as_ref() else {
            return;
        };
        let Some(payload) = self.queue.start_next() else {
            return;
        };
        match link.exchange(payload, self.config.response_terminator) {
            Ok(rx) => self.in_flight = Some(rx),
            Err(e) => {
                // The link is going away; its exit is handled next.
                debug!(error = %e, "link refused exchange, requeueing");
                self.queue.requeue_in_flight();
            }
        }
    }

    // -- connect -----------------------------------------------------------

    fn connect(&mut self) {
        if self.state.is_active() || self.connecting.is_some() {
            debug!(state = %self.state, "connect ignored, already connecting or connected");
            return;
        }
        self.closed = false;
        self.reconnect_at = None;
        self.start_connect();
    }

    fn start_connect(&mut self) {
        self.set_state(ConnectionState::Connecting);
        self.emit(DeviceEvent::Connecting);

        let connector = Arc::clone(&self.connector);
        debug!(target_addr = %connector.describe(), attempt = self.attempts, "connecting");
        self.connecting = Some(tokio::spawn(async move { connector.connect().await }));
    }

    fn on_connect_result(&mut self, result: Result<Box<dyn Transport>>) {
        match result {
            Ok(transport) => {
                debug!(target_addr = %self.connector.describe(), "transport open, flushing");
                let link = spawn_io_task(
                    transport,
                    IoConfig {
                        idle_timeout: self.config.idle_timeout,
                        line_ending: self.config.line_ending,
                    },
                );
                match link.exchange(self.config.probe, self.config.handshake_marker) {
                    Ok(rx) => self.handshake = Some(rx),
                    Err(e) => debug!(error = %e, "handshake not sent"),
                }
                self.link = Some(link);
            }
            Err(e) => {
                tracing::warn!(target_addr = %self.connector.describe(), error = %e, "connect failed");
                self.on_disconnect(Some(e.to_string()));
            }
        }
    }

    fn on_handshake(&mut self, result: Result<String>) {
        match result {
            Ok(reply) => {
                debug!(reply = ?reply, "handshake complete");
                let period = self.config.keepalive_interval;
                let mut keepalive = time::interval_at(Instant::now() + period, period);
                keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.keepalive = Some(keepalive);
                self.settle_at = Some(Instant::now() + self.config.settle_delay);
            }
            Err(e) => {
                // The link ends with the failed exchange; its exit follows.
                debug!(error = %e, "handshake failed");
            }
        }
    }

    fn on_settled(&mut self) {
        if self.link.is_none() {
            return;
        }
        self.attempts = 0;
        self.set_state(ConnectionState::Ready);
        self.emit(DeviceEvent::Ready);
        debug!(queued = self.queue.len(), "ready");
    }

    // -- disconnect --------------------------------------------------------

    fn on_link_exit(&mut self, exit: LinkExit) {
        match exit {
            LinkExit::Failed(message) => self.on_disconnect(Some(message)),
            LinkExit::TimedOut => {
                tracing::warn!("connection timed out, closing");
                self.on_disconnect(None);
            }
            LinkExit::Closed | LinkExit::Shutdown => self.on_disconnect(None),
        }
    }

    /// Clean up after the link (or a connect attempt) ended without an
    /// explicit close, then reconnect or fail the backlog.
    fn on_disconnect(&mut self, error: Option<String>) {
        self.keepalive = None;
        self.settle_at = None;
        self.handshake = None;
        if let Some(link) = self.link.take() {
            link.shutdown();
        }
        if let Some(mut rx) = self.in_flight.take() {
            match rx.try_recv() {
                Ok(result) => {
                    self.queue.complete(result);
                }
                Err(oneshot::error::TryRecvError::Closed) => self.queue.requeue_in_flight(),
                Err(oneshot::error::TryRecvError::Empty) => {
                    self.queue.complete(Err(Error::ConnectionLost));
                }
            }
        }
        // Keepalives queued for this link must not open the next one.
        self.queue.drop_detached();

        if let Some(message) = error {
            self.set_state(ConnectionState::Error);
            self.emit(DeviceEvent::Error { message });
        }
        self.set_state(ConnectionState::Disconnected);
        self.emit(DeviceEvent::Disconnected);

        if self.config.reconnect && !self.closed {
            self.attempts += 1;
            let delay = self.config.reconnect_delay;
            self.reconnect_at = Some(Instant::now() + delay);
            debug!(
                attempt = self.attempts,
                delay_ms = delay.as_millis() as u64,
                queued = self.queue.len(),
                "reconnect scheduled"
            );
            self.emit(DeviceEvent::Reconnecting {
                attempt: self.attempts,
                delay,
            });
        } else {
            self.queue.fail_all(|| Error::ConnectionClosed);
        }
    }

    /// Explicit close: tear everything down and never reconnect.
    async fn close(&mut self) {
        self.closed = true;
        self.reconnect_at = None;
        self.keepalive = None;
        self.settle_at = None;
        self.handshake = None;
        self.in_flight = None;

        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        if let Some(mut link) = self.link.take() {
            link.shutdown();
            let exit = link.wait().await;
            debug!(?exit, "link closed");
        }

        self.queue.drop_detached();
        let failed = self.queue.fail_all(|| Error::ConnectionClosed);
        if self.state != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected);
            self.emit(DeviceEvent::Disconnected);
        }
        debug!(failed, "controller closed");
    }
}

// ---------------------------------------------------------------------------
// Optional-slot futures
// ---------------------------------------------------------------------------
//
// Each resolves when the slot holds something that completes, and never
// resolves for an empty slot, so one select arm can stand for each.

/// `None` when the link dropped the exchange without answering it.
async fn recv_reply(slot: &mut ReplySlot) -> Option<Result<String>> {
    match slot.as_mut() {
        Some(rx) => rx.await.ok(),
        None => pending().await,
    }
}

async fn join_connect(slot: &mut Option<ConnectTask>) -> Result<Box<dyn Transport>> {
    match slot.as_mut() {
        Some(task) => match task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Transport(format!("connect task failed: {e}"))),
        },
        None => pending().await,
    }
}

async fn wait_link(slot: &mut Option<LinkIo>) -> LinkExit {
    match slot.as_mut() {
        Some(link) => link.wait().await,
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn tick(slot: &mut Option<Interval>) {
    match slot.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use qtpro_test_harness::{MockConnector, MockTransport};

    const NAK: &[u8] = b"{NAK}\r\n";

    fn test_config() -> ControllerConfig {
        ControllerConfig {
            keepalive_interval: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(4000),
            reconnect: false,
            ..ControllerConfig::default()
        }
    }

    /// A transport that completes the handshake.
    fn greeting_transport() -> MockTransport {
        let mut mock = MockTransport::new();
        mock.expect(b"\r", NAK);
        mock
    }

    fn spawn(connector: &MockConnector, config: ControllerConfig) -> Controller {
        Controller::spawn(Arc::new(connector.clone()), config)
    }

    async fn next_event(rx: &mut broadcast::Receiver<DeviceEvent>) -> DeviceEvent {
        time::timeout(Duration::from_secs(120), rx.recv())
            .await
            .expect("no event")
            .expect("event channel closed")
    }

    #[test]
    fn default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.keepalive_interval, Duration::from_secs(10));
        assert_eq!(config.idle_timeout, Duration::from_secs(12));
        assert_eq!(config.settle_delay, Duration::from_millis(100));
        assert_eq!(config.reconnect_delay, Duration::from_secs(20));
        assert!(config.reconnect);
        assert_eq!(config.probe, "");
        assert_eq!(config.handshake_marker, b"{NAK}\r\n");
        assert_eq!(config.response_terminator, b"\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_then_ready() {
        let connector = MockConnector::new();
        let mock = greeting_transport();
        let handle = mock.handle();
        connector.push(mock);

        let controller = spawn(&connector, test_config());
        let mut events = controller.subscribe();
        assert_eq!(controller.state(), ConnectionState::Disconnected);

        controller.connect();
        assert_eq!(next_event(&mut events).await, DeviceEvent::Connecting);
        assert_eq!(next_event(&mut events).await, DeviceEvent::Ready);
        assert_eq!(controller.state(), ConnectionState::Ready);
        assert_eq!(handle.sent(), vec![b"\r".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_delay_precedes_ready() {
        let connector = MockConnector::new();
        connector.push(greeting_transport());

        let config = ControllerConfig {
            settle_delay: Duration::from_millis(500),
            ..test_config()
        };
        let controller = spawn(&connector, config);
        let started = Instant::now();
        controller.connect();
        controller.wait_ready(Duration::from_secs(5)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn requests_complete_in_submission_order() {
        let connector = MockConnector::new();
        let mut mock = greeting_transport();
        mock.expect(b"CSGET,IPAD\r", b"{CSGET,IPAD=172.16.10.141}\r\n");
        mock.expect(b"CZGET,MAXM1\r", b"{CZGET,MAXM1=12}\r\n");
        mock.expect(b"ALSYS\r", b"{ALSYS=FIRM=6.7.2}\r\n");
        connector.push(mock);

        let controller = spawn(&connector, test_config());
        controller.connect();

        // Submitted while still connecting: they queue and run once ready.
        let a = controller.submit("CSGET,IPAD");
        let b = controller.submit("CZGET,MAXM1");
        let c = controller.submit("ALSYS");

        assert_eq!(a.recv().await.unwrap(), "{CSGET,IPAD=172.16.10.141}\r\n");
        assert_eq!(b.recv().await.unwrap(), "{CZGET,MAXM1=12}\r\n");
        assert_eq!(c.recv().await.unwrap(), "{ALSYS=FIRM=6.7.2}\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent() {
        let connector = MockConnector::new();
        connector.push(greeting_transport());

        let controller = spawn(&connector, test_config());
        controller.connect();
        controller.connect();
        controller.wait_ready(Duration::from_secs(5)).await.unwrap();
        controller.connect();
        time::sleep(Duration::from_secs(1)).await;

        assert_eq!(connector.attempts(), 1);
        assert_eq!(controller.state(), ConnectionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_sends_empty_command() {
        let connector = MockConnector::new();
        let mut mock = greeting_transport();
        mock.answer_always(b"\r", NAK);
        let handle = mock.handle();
        connector.push(mock);

        let config = ControllerConfig {
            keepalive_interval: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(12),
            ..test_config()
        };
        let controller = spawn(&connector, config);
        controller.connect();
        controller.wait_ready(Duration::from_secs(5)).await.unwrap();

        time::sleep(Duration::from_secs(35)).await;
        // Handshake plus one keepalive per period; the idle timeout never
        // fires because every keepalive is answered.
        assert!(handle.sent_count(b"\r") >= 4);
        assert_eq!(controller.state(), ConnectionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_before_connect_fails_fast() {
        let connector = MockConnector::new();
        let controller = spawn(&connector, test_config());

        let result = controller.request("CSGET,IPAD").await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_ready_times_out_while_disconnected() {
        let connector = MockConnector::new();
        let controller = spawn(&connector, test_config());

        let result = controller.wait_ready(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::Timeout)));

        // The watch is still usable after a timed-out wait.
        connector.push(greeting_transport());
        controller.connect();
        controller.wait_ready(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn peer_close_without_reconnect_fails_backlog() {
        let connector = MockConnector::new();
        let mut mock = greeting_transport();
        mock.expect_silent(b"CSGET,IPAD\r");
        mock.expect_disconnect();
        connector.push(mock);

        let controller = spawn(&connector, test_config());
        let mut events = controller.subscribe();
        controller.connect();
        controller.wait_ready(Duration::from_secs(5)).await.unwrap();

        let first = controller.submit("CSGET,IPAD");
        let second = controller.submit("CSGET,FIRM");

        // The in-flight request sees the transport failure, the queued one
        // the closed connection.
        assert!(matches!(first.recv().await, Err(Error::ConnectionLost)));
        assert!(matches!(second.recv().await, Err(Error::ConnectionClosed)));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&DeviceEvent::Disconnected));
        assert!(!seen.iter().any(|e| matches!(e, DeviceEvent::Reconnecting { .. })));
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_fixed_delay() {
        let connector = MockConnector::new();
        let mut first = greeting_transport();
        first.expect_disconnect_after(Duration::from_secs(1));
        connector.push(first);
        connector.push(greeting_transport());

        let config = ControllerConfig {
            reconnect: true,
            reconnect_delay: Duration::from_secs(20),
            ..test_config()
        };
        let controller = spawn(&connector, config);
        let mut events = controller.subscribe();
        controller.connect();

        assert_eq!(next_event(&mut events).await, DeviceEvent::Connecting);
        assert_eq!(next_event(&mut events).await, DeviceEvent::Ready);
        assert_eq!(next_event(&mut events).await, DeviceEvent::Disconnected);
        let dropped_at = Instant::now();
        assert_eq!(
            next_event(&mut events).await,
            DeviceEvent::Reconnecting {
                attempt: 1,
                delay: Duration::from_secs(20)
            }
        );
        assert_eq!(next_event(&mut events).await, DeviceEvent::Connecting);
        assert!(dropped_at.elapsed() >= Duration::from_secs(20));
        assert_eq!(next_event(&mut events).await, DeviceEvent::Ready);
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_wait_across_reconnect() {
        let connector = MockConnector::new();
        let mut first = greeting_transport();
        first.expect_disconnect();
        connector.push(first);
        let mut second = greeting_transport();
        second.expect(b"CSGET,FIRM\r", b"{CSGET,FIRM=6.7.2}\r\n");
        connector.push(second);

        let config = ControllerConfig {
            reconnect: true,
            reconnect_delay: Duration::from_secs(5),
            ..test_config()
        };
        let controller = spawn(&connector, config);
        let mut events = controller.subscribe();
        controller.connect();
        loop {
            if let DeviceEvent::Reconnecting { .. } = next_event(&mut events).await {
                break;
            }
        }

        // Disconnected but a reconnect is scheduled: the request waits.
        let reply = controller.request("CSGET,FIRM").await.unwrap();
        assert_eq!(reply, "{CSGET,FIRM=6.7.2}\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_reports_error_then_retries() {
        let connector = MockConnector::new();
        connector.push_refusal("connection refused");
        connector.push(greeting_transport());

        let config = ControllerConfig {
            reconnect: true,
            reconnect_delay: Duration::from_secs(20),
            ..test_config()
        };
        let controller = spawn(&connector, config);
        let mut events = controller.subscribe();
        controller.connect();

        assert_eq!(next_event(&mut events).await, DeviceEvent::Connecting);
        match next_event(&mut events).await {
            DeviceEvent::Error { message } => assert!(message.contains("connection refused")),
            other => panic!("expected error event, got {other:?}"),
        }
        assert_eq!(next_event(&mut events).await, DeviceEvent::Disconnected);
        assert!(matches!(
            next_event(&mut events).await,
            DeviceEvent::Reconnecting { attempt: 1, .. }
        ));
        controller.wait_ready(Duration::from_secs(60)).await.unwrap();
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_closes_and_reconnects() {
        let connector = MockConnector::new();
        // Keepalives go unanswered, so the link times out.
        let mut first = greeting_transport();
        first.expect_silent(b"\r");
        connector.push(first);
        let second = greeting_transport();
        let second_handle = second.handle();
        connector.push(second);

        let config = ControllerConfig {
            keepalive_interval: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(12),
            reconnect: true,
            reconnect_delay: Duration::from_secs(20),
            ..ControllerConfig::default()
        };
        let controller = spawn(&connector, config);
        let mut events = controller.subscribe();
        controller.connect();
        controller.wait_ready(Duration::from_secs(5)).await.unwrap();

        loop {
            if next_event(&mut events).await == DeviceEvent::Disconnected {
                break;
            }
        }
        assert!(matches!(
            next_event(&mut events).await,
            DeviceEvent::Reconnecting { attempt: 1, .. }
        ));
        controller.wait_ready(Duration::from_secs(60)).await.unwrap();
        assert_eq!(connector.attempts(), 2);
        // A keepalive queued while the first link was stalling is not
        // carried over: the new link has only seen its handshake.
        assert_eq!(second_handle.sent(), vec![b"\r".to_vec()]);
        assert_eq!(controller.state(), ConnectionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_request_does_not_hold_back_the_next() {
        let connector = MockConnector::new();
        let mut first = greeting_transport();
        first.expect_silent(b"CSGET,IPAD\r");
        first.expect_disconnect();
        connector.push(first);
        let mut second = greeting_transport();
        second.expect(b"CSGET,FIRM\r", b"{CSGET,FIRM=6.7.2}\r\n");
        connector.push(second);

        let config = ControllerConfig {
            reconnect: true,
            reconnect_delay: Duration::from_secs(5),
            ..test_config()
        };
        let controller = spawn(&connector, config);
        controller.connect();
        controller.wait_ready(Duration::from_secs(5)).await.unwrap();

        let k = controller.submit("CSGET,IPAD");
        let k_next = controller.submit("CSGET,FIRM");

        assert!(matches!(k.recv().await, Err(Error::ConnectionLost)));
        assert_eq!(k_next.recv().await.unwrap(), "{CSGET,FIRM=6.7.2}\r\n");
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_close_never_reconnects() {
        let connector = MockConnector::new();
        let mock = greeting_transport();
        let handle = mock.handle();
        connector.push(mock);
        connector.push(greeting_transport());

        let config = ControllerConfig {
            reconnect: true,
            reconnect_delay: Duration::from_secs(1),
            ..test_config()
        };
        let controller = spawn(&connector, config);
        controller.connect();
        controller.wait_ready(Duration::from_secs(5)).await.unwrap();

        controller.close().await;
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert!(handle.is_closed());

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);
        assert!(matches!(
            controller.request("CSGET,IPAD").await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn close_fails_pending_requests() {
        let connector = MockConnector::new();
        let mut mock = greeting_transport();
        mock.expect_silent(b"CSGET,IPAD\r");
        connector.push(mock);

        let controller = spawn(&connector, test_config());
        controller.connect();
        controller.wait_ready(Duration::from_secs(5)).await.unwrap();

        let in_flight = controller.submit("CSGET,IPAD");
        let queued = controller.submit("CSGET,FIRM");
        time::sleep(Duration::from_millis(50)).await;
        controller.close().await;

        assert!(matches!(in_flight.recv().await, Err(Error::ConnectionClosed)));
        assert!(matches!(queued.recv().await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_after_close_starts_again() {
        let connector = MockConnector::new();
        connector.push(greeting_transport());
        connector.push(greeting_transport());

        let controller = spawn(&connector, test_config());
        controller.connect();
        controller.wait_ready(Duration::from_secs(5)).await.unwrap();
        controller.close().await;

        controller.connect();
        controller.wait_ready(Duration::from_secs(5)).await.unwrap();
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_closes_transport() {
        let connector = MockConnector::new();
        let mock = greeting_transport();
        let handle = mock.handle();
        connector.push(mock);

        let controller = spawn(&connector, test_config());
        controller.connect();
        controller.wait_ready(Duration::from_secs(5)).await.unwrap();
        drop(controller);

        time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_closed());
    }
}
