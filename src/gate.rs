//! Readiness gate: a one-shot latch with a FIFO waiter queue
//!
//! Requests that arrive before the upstream application is ready are parked
//! here in arrival order. The state check and the enqueue happen under the
//! same lock as the flip to `Ready` and the queue take, so a request is never
//! both queued and forwarded.

use crate::message::{ProxyRequest, ProxyResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::debug;

/// Lifecycle of the upstream as seen by incoming requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateState {
    /// No boot attempt in progress
    NotStarted,
    /// Boot in progress, requests are queued
    Starting,
    /// Upstream ready, requests are forwarded immediately
    Ready,
}

/// A request parked until the gate resolves
pub struct PendingRequest {
    request: ProxyRequest,
    reply: oneshot::Sender<ProxyResponse>,
}

impl PendingRequest {
    pub fn request(&self) -> &ProxyRequest {
        &self.request
    }

    /// Split into the request and its one-shot responder
    pub fn into_parts(self) -> (ProxyRequest, Responder) {
        (self.request, Responder(self.reply))
    }

    /// Complete the request without forwarding it
    pub fn respond(self, response: ProxyResponse) {
        Responder(self.reply).send(response);
    }
}

/// Completes a parked request exactly once
pub struct Responder(oneshot::Sender<ProxyResponse>);

impl Responder {
    pub fn send(self, response: ProxyResponse) {
        if self.0.send(response).is_err() {
            // Client went away while queued
            debug!("Dropping response for disconnected client");
        }
    }
}

/// Outcome of admitting a request through the gate
pub enum Admission {
    /// Upstream is ready: forward now
    Forward(ProxyRequest),
    /// Parked until the gate resolves
    Queued {
        reply: oneshot::Receiver<ProxyResponse>,
        /// True for exactly the request that moved the gate out of `NotStarted`
        boot: bool,
    },
}

struct GateInner {
    state: GateState,
    queue: VecDeque<PendingRequest>,
}

pub struct ReadinessGate {
    inner: Mutex<GateInner>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GateInner {
                state: GateState::NotStarted,
                queue: VecDeque::new(),
            }),
        }
    }

    pub fn state(&self) -> GateState {
        self.inner.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == GateState::Ready
    }

    /// Number of requests currently parked
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Forward when ready, otherwise park the request.
    pub fn admit(&self, request: ProxyRequest) -> Admission {
        let mut inner = self.inner.lock();

        let boot = match inner.state {
            GateState::Ready => return Admission::Forward(request),
            GateState::NotStarted => {
                inner.state = GateState::Starting;
                true
            }
            GateState::Starting => false,
        };

        let (tx, rx) = oneshot::channel();
        inner.queue.push_back(PendingRequest { request, reply: tx });
        debug!(queued = inner.queue.len(), boot, "Request queued until upstream is ready");

        Admission::Queued { reply: rx, boot }
    }

    /// Mark the upstream ready and take every parked request in arrival order.
    ///
    /// `Ready` is terminal; calling this again returns an empty list.
    pub fn open(&self) -> Vec<PendingRequest> {
        let mut inner = self.inner.lock();
        inner.state = GateState::Ready;
        inner.queue.drain(..).collect()
    }

    /// Abandon the current boot attempt and take every parked request so each
    /// can be answered with a failure. The gate returns to `NotStarted`.
    pub fn fail(&self) -> Vec<PendingRequest> {
        let mut inner = self.inner.lock();
        if inner.state == GateState::Starting {
            inner.state = GateState::NotStarted;
        }
        inner.queue.drain(..).collect()
    }
}
