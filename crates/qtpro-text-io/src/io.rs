//! Per-connection IO task for the Qt Pro text protocol.
//!
//! One tokio task owns the transport of a single connection and runs one
//! send-and-wait exchange at a time: write the payload plus line ending,
//! then accumulate bytes until the caller's wait-for pattern shows up.
//! Between exchanges it keeps reading so that unsolicited bytes are
//! discarded, a peer close is noticed, and an idle connection is timed out.
//!
//! The task ends when the link dies or is shut down. Its [`LinkExit`]
//! tells the owner why, and the transport is always closed on the way out.
//! Reconnecting is the owner's job; a link is never reused.

use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use qtpro_core::error::{Error, Result};
use qtpro_core::transport::Transport;

use crate::protocol;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for one link's IO task.
#[derive(Debug, Clone)]
pub struct IoConfig {
    /// How long the connection may stay silent before the link is judged
    /// dead. Applies both between exchanges and while waiting for a reply.
    pub idle_timeout: Duration,
    /// Bytes appended to every outbound payload.
    pub line_ending: &'static [u8],
}

impl Default for IoConfig {
    fn default() -> Self {
        IoConfig {
            idle_timeout: Duration::from_secs(12),
            line_ending: protocol::LINE_ENDING,
        }
    }
}

/// One send-and-wait exchange handed to the IO task.
#[derive(Debug)]
pub struct Exchange {
    /// Command text without line ending.
    pub payload: String,
    /// Pattern that ends the reply.
    pub wait_for: Vec<u8>,
    /// Receives the reply text (up to and including the pattern).
    pub reply: oneshot::Sender<Result<String>>,
}

/// Why a link's IO task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkExit {
    /// The peer closed the connection.
    Closed,
    /// Nothing was received for longer than the idle timeout.
    TimedOut,
    /// The transport failed; carries the error text.
    Failed(String),
    /// The owner shut the link down.
    Shutdown,
}

impl LinkExit {
    fn from_error(err: &Error) -> Self {
        match err {
            Error::ConnectionLost | Error::NotConnected => LinkExit::Closed,
            Error::Timeout => LinkExit::TimedOut,
            other => LinkExit::Failed(other.to_string()),
        }
    }
}

/// Handle to a running link IO task.
pub struct LinkIo {
    tx: mpsc::Sender<Exchange>,
    cancel: CancellationToken,
    task: Option<JoinHandle<LinkExit>>,
}

impl LinkIo {
    /// Queue an exchange on the link.
    ///
    /// Returns the receiver for its reply, or [`Error::NotConnected`] if the
    /// IO task has already ended.
    pub fn exchange(
        &self,
        payload: impl Into<String>,
        wait_for: &[u8],
    ) -> Result<oneshot::Receiver<Result<String>>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = Exchange {
            payload: payload.into(),
            wait_for: wait_for.to_vec(),
            reply: reply_tx,
        };
        self.tx.try_send(exchange).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => Error::NotConnected,
            mpsc::error::TrySendError::Full(_) => {
                Error::Protocol("link exchange channel full".into())
            }
        })?;
        Ok(reply_rx)
    }

    /// Wait for the IO task to end and report why.
    ///
    /// Cancel-safe: if the future is dropped the task keeps running and a
    /// later call picks up where this one left off. Once the exit has been
    /// reported, further calls never complete.
    pub async fn wait(&mut self) -> LinkExit {
        let Some(task) = self.task.as_mut() else {
            return std::future::pending().await;
        };
        let exit = match task.await {
            Ok(exit) => exit,
            Err(e) => LinkExit::Failed(format!("link task aborted: {e}")),
        };
        self.task = None;
        exit
    }

    /// Whether the IO task is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Ask the IO task to stop. Any exchange in progress is failed with
    /// [`Error::ConnectionClosed`] and the transport is closed.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for LinkIo {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the IO task for a freshly connected transport.
pub fn spawn_io_task(transport: Box<dyn Transport>, config: IoConfig) -> LinkIo {
    let (tx, rx) = mpsc::channel::<Exchange>(8);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(io_loop(transport, config, rx, cancel.clone()));
    LinkIo {
        tx,
        cancel,
        task: Some(task),
    }
}

// ---------------------------------------------------------------------------
// IO Loop
// ---------------------------------------------------------------------------

/// Maximum buffer size before a reply is rejected.
/// Replies are at most a few hundred bytes; 8192 is generous headroom.
const MAX_BUF: usize = 8192;

/// Longest single read while idle, so shutdown and new exchanges are
/// picked up promptly.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Pause after an empty read before polling again.
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

enum IdleOutcome {
    Quiet,
    Discarded(usize),
    Exit(LinkExit),
}

/// The main IO loop. Runs as a spawned Tokio task.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Exchange dispatch
/// 3. Idle reading (discard, peer close, idle timeout)
async fn io_loop(
    mut transport: Box<dyn Transport>,
    config: IoConfig,
    mut rx: mpsc::Receiver<Exchange>,
    cancel: CancellationToken,
) -> LinkExit {
    let mut last_activity = Instant::now();

    let exit = loop {
        let idle_since = last_activity;

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("link IO task cancelled");
                break LinkExit::Shutdown;
            }

            req = rx.recv() => {
                let Some(exchange) = req else {
                    debug!("exchange channel closed, exiting link IO task");
                    break LinkExit::Shutdown;
                };

                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = execute_exchange(
                        &mut *transport, &exchange.payload, &exchange.wait_for, &config,
                    ) => Some(result),
                };

                match outcome {
                    Some(Ok(text)) => {
                        last_activity = Instant::now();
                        let _ = exchange.reply.send(Ok(text));
                    }
                    Some(Err(e)) => {
                        let exit = LinkExit::from_error(&e);
                        debug!(payload = %exchange.payload, error = %e, "exchange failed, ending link");
                        let _ = exchange.reply.send(Err(e));
                        break exit;
                    }
                    None => {
                        debug!(payload = %exchange.payload, "link shut down during exchange");
                        let _ = exchange.reply.send(Err(Error::ConnectionClosed));
                        break LinkExit::Shutdown;
                    }
                }
            }

            idle = async {
                let elapsed = idle_since.elapsed();
                if elapsed >= config.idle_timeout {
                    return IdleOutcome::Exit(LinkExit::TimedOut);
                }
                let wait = IDLE_POLL.min(config.idle_timeout - elapsed);
                let mut buf = [0u8; 256];
                match transport.receive(&mut buf, wait).await {
                    Ok(n) if n > 0 => {
                        trace!(bytes = ?protocol::decode_text(&buf[..n]), "discarding unsolicited bytes");
                        IdleOutcome::Discarded(n)
                    }
                    Ok(_) | Err(Error::Timeout) => {
                        // Yield briefly so the loop can check for
                        // exchanges or cancellation.
                        tokio::time::sleep(IDLE_BACKOFF).await;
                        IdleOutcome::Quiet
                    }
                    Err(e) => IdleOutcome::Exit(LinkExit::from_error(&e)),
                }
            } => {
                match idle {
                    IdleOutcome::Quiet => {}
                    IdleOutcome::Discarded(_) => last_activity = Instant::now(),
                    IdleOutcome::Exit(exit) => break exit,
                }
            }
        }
    };

    match &exit {
        LinkExit::TimedOut => warn!(
            idle_timeout_ms = config.idle_timeout.as_millis() as u64,
            "link idle timeout"
        ),
        LinkExit::Failed(message) => warn!(error = %message, "link failed"),
        LinkExit::Closed => debug!("link closed by peer"),
        LinkExit::Shutdown => debug!("link shut down"),
    }

    // Exchanges queued behind the one that ended the link never reached the
    // wire. Dropping them unanswered lets the owner retry them elsewhere.
    rx.close();
    while let Ok(exchange) = rx.try_recv() {
        trace!(payload = %exchange.payload, "dropping unsent exchange");
    }

    if let Err(e) = transport.close().await {
        debug!(error = %e, "error closing transport");
    }

    exit
}

// ---------------------------------------------------------------------------
// Exchange execution
// ---------------------------------------------------------------------------

/// Send one command and read until `wait_for` appears.
///
/// The idle deadline restarts whenever bytes arrive, so a slow but live
/// device is waited on indefinitely while a silent one times out. Bytes
/// after the match are dropped.
async fn execute_exchange(
    transport: &mut dyn Transport,
    payload: &str,
    wait_for: &[u8],
    config: &IoConfig,
) -> Result<String> {
    let frame = protocol::frame_command(payload, config.line_ending);
    trace!(payload, "sending command");
    transport.send(&frame).await?;

    let mut response_buf = BytesMut::with_capacity(256);
    let mut recv_buf = [0u8; 256];
    let mut deadline = Instant::now() + config.idle_timeout;

    loop {
        if let Some(end) = protocol::find_pattern(&response_buf, wait_for) {
            let response = response_buf.split_to(end);
            if !response_buf.is_empty() {
                trace!(
                    dropped = ?protocol::decode_text(&response_buf),
                    "dropping bytes after matched reply"
                );
            }
            let text = protocol::decode_text(&response);
            trace!(payload, response = ?text, "command complete");
            return Ok(text);
        }

        let now = Instant::now();
        if now >= deadline {
            debug!(
                payload,
                buffered = response_buf.len(),
                "no reply before idle timeout"
            );
            return Err(Error::Timeout);
        }

        match transport.receive(&mut recv_buf, deadline - now).await {
            Ok(n) if n > 0 => {
                response_buf.extend_from_slice(&recv_buf[..n]);
                deadline = Instant::now() + config.idle_timeout;

                // Bounded buffer: a reply that never terminates is a
                // framing failure, not something to wait out.
                if response_buf.len() > MAX_BUF {
                    warn!(len = response_buf.len(), "response buffer overflow");
                    return Err(Error::Protocol(format!(
                        "reply exceeded {MAX_BUF} bytes without terminator"
                    )));
                }
            }
            Ok(_) | Err(Error::Timeout) => {
                tokio::time::sleep(IDLE_BACKOFF).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
