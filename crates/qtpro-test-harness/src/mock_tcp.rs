//! Mock TCP server for protocol-level testing.
//!
//! [`MockTcpServer`] provides a lightweight TCP listener pre-loaded with
//! scripted responses, enabling deterministic end-to-end testing of the
//! client stack (TCP transport, telnet filtering, IO task, controller)
//! without a real controller on the network.
//!
//! # Example
//!
//! ```
//! use qtpro_test_harness::MockTcpServer;
//!
//! # async fn example() -> qtpro_core::Result<()> {
//! let mut server = MockTcpServer::new().await?;
//!
//! // When the client sends "CSGET,FIRM\r", respond with the firmware version.
//! server.expect(b"CSGET,FIRM\r", b"{CSGET,FIRM=6.7.2}\r\n");
//!
//! // Get the port to point a TcpConnector at
//! let port = server.port();
//! server.start();
//! // ... connect and test ...
//! # Ok(())
//! # }
//! ```

use qtpro_core::error::{Error, Result};
use std::collections::VecDeque;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::debug;

const IAC: u8 = 255;

/// A pre-loaded request/response pair for the mock TCP server.
#[derive(Debug, Clone)]
struct TcpExpectation {
    /// The exact bytes we expect the client to send.
    request: Vec<u8>,
    /// The bytes to send back when the matching request is received.
    response: Vec<u8>,
}

/// What the server observed once the session ended.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// Telnet negotiation replies sent by the client (`IAC cmd opt` triples).
    pub telnet_replies: Vec<[u8; 3]>,
    /// Bytes the client sent after the last expectation was met.
    pub trailing: Vec<u8>,
}

/// A mock TCP server for testing the client over the network.
///
/// The server listens on a random available port on localhost. Once
/// [`start`](MockTcpServer::start) is called, it accepts a single
/// connection, writes the optional greeting, and processes expectations in
/// order: for each expected request, it reads from the client and writes
/// back the corresponding response. Telnet negotiation bytes sent by the
/// client are recorded and skipped when matching requests.
///
/// After the last expectation the server either hangs up
/// ([`hang_up_when_done`](MockTcpServer::hang_up_when_done)) or keeps the
/// connection open until the client closes it.
pub struct MockTcpServer {
    listener: Option<TcpListener>,
    port: u16,
    greeting: Vec<u8>,
    expectations: VecDeque<TcpExpectation>,
    hang_up: bool,
    /// Handle to the server task once started.
    server_handle: Option<JoinHandle<std::result::Result<SessionReport, String>>>,
}

impl MockTcpServer {
    /// Create a new mock TCP server listening on a random port.
    ///
    /// The server does not accept connections until [`start`](MockTcpServer::start)
    /// is called, allowing expectations to be loaded first.
    pub async fn new() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock TCP server: {}", e)))?;
        let port = listener.local_addr().map_err(Error::Io)?.port();
        Ok(Self {
            listener: Some(listener),
            port,
            greeting: Vec::new(),
            expectations: VecDeque::new(),
            hang_up: false,
            server_handle: None,
        })
    }

    /// Bytes written as soon as the client connects (banner, telnet
    /// option requests).
    pub fn greet(&mut self, bytes: &[u8]) {
        self.greeting.extend_from_slice(bytes);
    }

    /// Add an expected request/response pair.
    ///
    /// Expectations are consumed in order. When the connected client sends
    /// bytes matching `request`, the server replies with `response`.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(TcpExpectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Close the connection right after the last expectation.
    pub fn hang_up_when_done(&mut self) {
        self.hang_up = true;
    }

    /// The port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The address the server is listening on (e.g. "127.0.0.1:54321").
    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Start the server, accepting a single client connection and processing
    /// all expectations.
    ///
    /// This spawns a background task. Call [`wait`](MockTcpServer::wait) to
    /// block until the session has ended and check for errors.
    pub fn start(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let greeting = std::mem::take(&mut self.greeting);
        let expectations: Vec<TcpExpectation> = self.expectations.drain(..).collect();
        let hang_up = self.hang_up;

        let handle = tokio::spawn(async move {
            let (mut stream, peer) = listener
                .accept()
                .await
                .map_err(|e| format!("failed to accept connection: {}", e))?;
            debug!(%peer, "mock server accepted connection");

            let mut session = Session::default();

            if !greeting.is_empty() {
                session.write(&mut stream, &greeting, "greeting").await?;
            }

            for (i, expectation) in expectations.iter().enumerate() {
                let context = format!("expectation {}", i);
                let got = session
                    .read_exact_data(&mut stream, expectation.request.len(), &context)
                    .await?;
                if got != expectation.request {
                    return Err(format!(
                        "{}: request mismatch: expected {:?}, got {:?}",
                        context,
                        String::from_utf8_lossy(&expectation.request),
                        String::from_utf8_lossy(&got)
                    ));
                }
                session.write(&mut stream, &expectation.response, &context).await?;
            }

            if !hang_up {
                // Hold the connection until the client goes away.
                session.drain_until_eof(&mut stream).await;
            }

            Ok(session.report)
        });

        self.server_handle = Some(handle);
    }

    /// Wait for the server task to complete and return what it observed.
    ///
    /// Call this after the client has finished its interactions to verify
    /// that all expectations were met.
    pub async fn wait(self) -> std::result::Result<SessionReport, String> {
        match self.server_handle {
            Some(handle) => handle
                .await
                .map_err(|e| format!("server task panicked: {}", e))?,
            None => Ok(SessionReport::default()),
        }
    }
}

/// Per-connection read state: data bytes split out from telnet replies.
#[derive(Default)]
struct Session {
    pending: VecDeque<u8>,
    report: SessionReport,
}

impl Session {
    async fn write(
        &mut self,
        stream: &mut TcpStream,
        bytes: &[u8],
        context: &str,
    ) -> std::result::Result<(), String> {
        stream
            .write_all(bytes)
            .await
            .map_err(|e| format!("{}: write error: {}", context, e))?;
        stream
            .flush()
            .await
            .map_err(|e| format!("{}: flush error: {}", context, e))
    }

    /// Read until `len` data bytes are available, skipping telnet triples.
    async fn read_exact_data(
        &mut self,
        stream: &mut TcpStream,
        len: usize,
        context: &str,
    ) -> std::result::Result<Vec<u8>, String> {
        let mut raw = Vec::new();
        loop {
            self.absorb(&mut raw);
            if self.pending.len() >= len {
                return Ok(self.pending.drain(..len).collect());
            }
            let mut buf = [0u8; 256];
            let n = stream
                .read(&mut buf)
                .await
                .map_err(|e| format!("{}: read error: {}", context, e))?;
            if n == 0 {
                return Err(format!(
                    "{}: client disconnected after {} bytes (expected {})",
                    context,
                    self.pending.len(),
                    len
                ));
            }
            raw.extend_from_slice(&buf[..n]);
        }
    }

    async fn drain_until_eof(&mut self, stream: &mut TcpStream) {
        let mut raw = Vec::new();
        let mut buf = [0u8; 256];
        while let Ok(n) = stream.read(&mut buf).await {
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            self.absorb(&mut raw);
        }
        self.report.trailing.extend(self.pending.drain(..));
    }

    /// Move complete data bytes and telnet triples out of `raw`, leaving
    /// any incomplete telnet sequence behind.
    fn absorb(&mut self, raw: &mut Vec<u8>) {
        let mut i = 0;
        while i < raw.len() {
            if raw[i] == IAC {
                if i + 3 > raw.len() {
                    break;
                }
                self.report
                    .telnet_replies
                    .push([raw[i], raw[i + 1], raw[i + 2]]);
                i += 3;
            } else {
                self.pending.push_back(raw[i]);
                i += 1;
            }
        }
        raw.drain(..i);
    }
}
