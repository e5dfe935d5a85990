//! Mock connector handing out scripted transports.
//!
//! The controller asks its [`Connector`] for a fresh transport on every
//! connect and reconnect attempt. [`MockConnector`] serves pre-loaded
//! [`MockTransport`]s (or scripted connect failures) in order, and counts
//! attempts so tests can assert on reconnect behaviour.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use qtpro_core::error::{Error, Result};
use qtpro_core::transport::{Connector, Transport};

use crate::mock_transport::MockTransport;

enum Attempt {
    Connect(MockTransport),
    Refuse(String),
}

/// A [`Connector`] that replays a script of connect outcomes.
///
/// Once the script is exhausted every further attempt fails with
/// [`Error::Transport`].
#[derive(Clone, Default)]
pub struct MockConnector {
    script: Arc<Mutex<VecDeque<Attempt>>>,
    attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful attempt yielding `transport`.
    pub fn push(&self, transport: MockTransport) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Attempt::Connect(transport));
        }
    }

    /// Queue a failed attempt.
    pub fn push_refusal(&self, reason: &str) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Attempt::Refuse(reason.to_string()));
        }
    }

    /// Number of `connect()` calls made so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(Attempt::Connect(transport)) => Ok(Box::new(transport)),
            Some(Attempt::Refuse(reason)) => Err(Error::Transport(reason)),
            None => Err(Error::Transport(format!(
                "mock connector exhausted (attempt {attempt})"
            ))),
        }
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
