//! Mock transport for deterministic testing of the link IO task and the
//! connection controller.
//!
//! [`MockTransport`] implements the [`Transport`] trait with a pre-loaded
//! script of steps. This lets you test command framing, reply matching,
//! keepalive traffic, and disconnect handling without a real controller.
//!
//! # Example
//!
//! ```
//! use qtpro_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // Pre-load: when the IO task sends this command, return this reply.
//! mock.expect(b"CSGET,IPAD\r", b"{CSGET,IPAD=172.16.10.141}\r\n");
//! // Then the peer hangs up.
//! mock.expect_disconnect();
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use qtpro_core::error::{Error, Result};
use qtpro_core::transport::Transport;

/// One scripted step.
#[derive(Debug, Clone)]
enum Step {
    /// Expect exactly `request` to be sent; queue `response` for reading.
    Exchange { request: Vec<u8>, response: Vec<u8> },
    /// Deliver bytes nobody asked for on the next read.
    Unsolicited(Vec<u8>),
    /// The peer closes the connection, `after` the step is first reached
    /// by a read.
    Disconnect {
        after: Duration,
        deadline: Option<Instant>,
    },
}

/// State shared between a [`MockTransport`] and its [`MockHandle`]s.
#[derive(Debug, Default)]
struct Shared {
    sent: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
}

/// Observer for a [`MockTransport`] that has been moved into an IO task.
#[derive(Debug, Clone)]
pub struct MockHandle {
    shared: Arc<Shared>,
}

impl MockHandle {
    /// Every payload sent so far, one element per `send()` call.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.shared
            .sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// How many times exactly `data` was sent.
    pub fn sent_count(&self, data: &[u8]) -> usize {
        self.sent().iter().filter(|s| s.as_slice() == data).count()
    }

    /// Whether `close()` has been called on the transport.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

/// A mock [`Transport`] for testing without hardware.
///
/// Steps are consumed in order. When `send()` is called, the sent data is
/// recorded and matched against the next exchange step; the corresponding
/// response is then returned by subsequent `receive()` calls. A receive
/// with nothing to deliver reports [`Error::Timeout`] immediately.
///
/// If the sent data does not match, or the script is exhausted, `send()`
/// returns [`Error::Protocol`].
#[derive(Debug)]
pub struct MockTransport {
    /// Ordered script of steps.
    steps: VecDeque<Step>,
    /// Exchange consumed when the script is exhausted (keepalives).
    fallback: Option<(Vec<u8>, Vec<u8>)>,
    /// The response data pending for the next `receive()` call.
    pending_response: Option<Vec<u8>>,
    /// Cursor into the pending response (how many bytes have been read so far).
    response_cursor: usize,
    /// Whether the transport is "connected".
    connected: bool,
    shared: Arc<Shared>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            steps: VecDeque::new(),
            fallback: None,
            pending_response: None,
            response_cursor: 0,
            connected: true,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Add an expected request/response pair.
    ///
    /// When `send()` is called with data matching `request`, the subsequent
    /// `receive()` calls will return `response`.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.steps.push_back(Step::Exchange {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Expect `request` to be sent and never answer it.
    pub fn expect_silent(&mut self, request: &[u8]) {
        self.expect(request, &[]);
    }

    /// Deliver `data` on the next read without anything being sent.
    pub fn push_unsolicited(&mut self, data: &[u8]) {
        self.steps.push_back(Step::Unsolicited(data.to_vec()));
    }

    /// Have the peer close the connection once the preceding steps are done.
    pub fn expect_disconnect(&mut self) {
        self.expect_disconnect_after(Duration::ZERO);
    }

    /// Like [`expect_disconnect`](Self::expect_disconnect), but the peer
    /// stays quiet for `after` (tokio time) before closing.
    pub fn expect_disconnect_after(&mut self, after: Duration) {
        self.steps.push_back(Step::Disconnect {
            after,
            deadline: None,
        });
    }

    /// Answer `request` with `response` any number of times once the script
    /// is exhausted.
    pub fn answer_always(&mut self, request: &[u8], response: &[u8]) {
        self.fallback = Some((request.to_vec(), response.to_vec()));
    }

    /// Return a handle for observing the transport after it has been boxed
    /// and handed to an IO task.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Return all data that has been sent through this transport.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.handle().sent()
    }

    /// Return the number of script steps that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.steps.len()
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    fn record(&self, data: &[u8]) {
        if let Ok(mut sent) = self.shared.sent.lock() {
            sent.push(data.to_vec());
        }
    }

    fn deliver(&mut self, buf: &mut [u8]) -> Option<usize> {
        let response = self.pending_response.as_ref()?;
        let remaining = &response[self.response_cursor..];
        if remaining.is_empty() {
            self.pending_response = None;
            self.response_cursor = 0;
            return None;
        }
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.response_cursor += n;
        if self.response_cursor >= response.len() {
            // All response bytes consumed; clear for next exchange.
            self.pending_response = None;
            self.response_cursor = 0;
        }
        Some(n)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        // Record what was sent.
        self.record(data);

        // Unsolicited data still queued arrives ahead of the reply.
        let mut delivered = Vec::new();
        while let Some(Step::Unsolicited(_)) = self.steps.front() {
            if let Some(Step::Unsolicited(stale)) = self.steps.pop_front() {
                delivered.extend_from_slice(&stale);
            }
        }

        match self.steps.pop_front() {
            Some(Step::Exchange { request, response }) => {
                if data != request.as_slice() {
                    return Err(Error::Protocol(format!(
                        "unexpected send data: expected {:?}, got {:?}",
                        String::from_utf8_lossy(&request),
                        String::from_utf8_lossy(data)
                    )));
                }
                delivered.extend_from_slice(&response);
            }
            Some(Step::Disconnect { .. }) => {
                self.connected = false;
                return Err(Error::ConnectionLost);
            }
            Some(Step::Unsolicited(_)) | None => match &self.fallback {
                Some((request, response)) if data == request.as_slice() => {
                    delivered.extend_from_slice(response);
                }
                _ => {
                    return Err(Error::Protocol(format!(
                        "no more expectations in mock transport (sent {:?})",
                        String::from_utf8_lossy(data)
                    )));
                }
            },
        }

        self.pending_response = Some(delivered);
        self.response_cursor = 0;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        if let Some(n) = self.deliver(buf) {
            return Ok(n);
        }

        match self.steps.front_mut() {
            Some(Step::Unsolicited(_)) => {
                if let Some(Step::Unsolicited(data)) = self.steps.pop_front() {
                    self.pending_response = Some(data);
                    self.response_cursor = 0;
                }
                self.deliver(buf).ok_or(Error::Timeout)
            }
            Some(Step::Disconnect { after, deadline }) => {
                let now = Instant::now();
                let deadline = *deadline.get_or_insert(now + *after);
                if now < deadline {
                    return Err(Error::Timeout);
                }
                self.steps.pop_front();
                self.connected = false;
                Err(Error::ConnectionLost)
            }
            _ => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.pending_response = None;
        self.response_cursor = 0;
        self.shared.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
