//! FIFO request queue with single-flight dispatch.
//!
//! Every outbound command, including keepalive probes, passes through one
//! [`RequestQueue`]. The queue hands out at most one request at a time;
//! the next request is released only after the in-flight one has been
//! completed, whatever the outcome. Completion is delivered through a
//! oneshot channel, so a caller is never woken synchronously from inside
//! the queue and may submit again from its completion path without
//! reentrancy.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use qtpro_core::error::{Error, Result};

/// Completion channel for one request: the raw reply text or the error
/// that ended the exchange.
pub type Reply = oneshot::Sender<Result<String>>;

/// One queued command and the handler waiting for its reply.
#[derive(Debug)]
pub struct PendingRequest {
    payload: String,
    reply: Option<Reply>,
    enqueued_at: Instant,
}

impl PendingRequest {
    /// A request whose reply is delivered to `reply`.
    pub fn new(payload: impl Into<String>, reply: Reply) -> Self {
        PendingRequest {
            payload: payload.into(),
            reply: Some(reply),
            enqueued_at: Instant::now(),
        }
    }

    /// A request whose reply is discarded (keepalive probes).
    pub fn detached(payload: impl Into<String>) -> Self {
        PendingRequest {
            payload: payload.into(),
            reply: None,
            enqueued_at: Instant::now(),
        }
    }

    /// The encoded command, without line ending.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// When the request entered the queue.
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Whether nobody is waiting for the reply.
    pub fn is_detached(&self) -> bool {
        self.reply.is_none()
    }

    /// Deliver the outcome, consuming the request.
    pub fn complete(self, result: Result<String>) {
        let elapsed_ms = self.enqueued_at.elapsed().as_millis();
        match self.reply {
            Some(reply) => {
                if reply.send(result).is_err() {
                    debug!(payload = %self.payload, "requester went away before completion");
                }
            }
            None => {
                trace!(payload = %self.payload, ok = result.is_ok(), elapsed_ms, "detached request completed");
            }
        }
    }
}

/// Ordered queue of pending requests plus the single in-flight slot.
#[derive(Debug, Default)]
pub struct RequestQueue {
    pending: VecDeque<PendingRequest>,
    in_flight: Option<PendingRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request to the tail of the queue.
    pub fn submit(&mut self, request: PendingRequest) {
        trace!(payload = %request.payload, depth = self.pending.len(), "request queued");
        self.pending.push_back(request);
    }

    /// Move the head of the queue into the in-flight slot.
    ///
    /// Returns the payload to send, or `None` when a request is already in
    /// flight or nothing is queued.
    pub fn start_next(&mut self) -> Option<&str> {
        if self.in_flight.is_some() {
            return None;
        }
        self.in_flight = self.pending.pop_front();
        self.in_flight.as_ref().map(|r| r.payload.as_str())
    }

    /// Complete the in-flight request with `result` and free the slot.
    ///
    /// Returns `false` if nothing was in flight.
    pub fn complete(&mut self, result: Result<String>) -> bool {
        match self.in_flight.take() {
            Some(request) => {
                request.complete(result);
                true
            }
            None => false,
        }
    }

    /// Put the in-flight request back at the head of the queue.
    ///
    /// Used when the request never reached the wire, so it keeps its place.
    pub fn requeue_in_flight(&mut self) {
        if let Some(request) = self.in_flight.take() {
            self.pending.push_front(request);
        }
    }

    /// Remove queued requests whose reply nobody waits for.
    ///
    /// The in-flight slot is left alone. Returns how many were removed.
    pub fn drop_detached(&mut self) -> usize {
        let before = self.pending.len();
        self.pending.retain(|request| !request.is_detached());
        let dropped = before - self.pending.len();
        if dropped > 0 {
            debug!(dropped, "dropped detached requests");
        }
        dropped
    }

    /// Fail the in-flight request and every queued request, in order.
    ///
    /// Returns how many requests were failed.
    pub fn fail_all(&mut self, make_error: impl Fn() -> Error) -> usize {
        let mut failed = 0;
        if let Some(request) = self.in_flight.take() {
            request.complete(Err(make_error()));
            failed += 1;
        }
        while let Some(request) = self.pending.pop_front() {
            request.complete(Err(make_error()));
            failed += 1;
        }
        if failed > 0 {
            debug!(failed, "failed queued requests");
        }
        failed
    }

    /// Whether a request is currently in flight.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Number of requests waiting behind the in-flight one.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is queued or in flight.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_none()
    }
}
