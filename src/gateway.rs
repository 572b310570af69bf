//! Entry point: boots the upstream on first use and routes each request
//! through the readiness gate.
//!
//! ```text
//! NotStarted --first request--> Starting --marker or timeout--> Ready
//!      ^                            |
//!      +------ startup failure -----+
//! ```
//!
//! While `Starting`, every request is queued. On success the queue is
//! forwarded in arrival order; on failure every queued request, including the
//! one that triggered the boot, receives a 500.

use crate::config::Config;
use crate::error::ProxyErrorCode;
use crate::forward::{ForwardStats, Forwarder, PoolConfig};
use crate::gate::{Admission, GateState, ReadinessGate};
use crate::message::{ProxyRequest, ProxyResponse};
use crate::process::UpstreamManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Body message for requests caught by a failed boot attempt
pub const STARTUP_FAILED_MESSAGE: &str = "Failed to start server";

pub struct Gateway {
    gate: ReadinessGate,
    upstream: Arc<UpstreamManager>,
    forwarder: Forwarder,
}

impl Gateway {
    pub fn new(upstream: Arc<UpstreamManager>, pool_config: PoolConfig) -> Arc<Self> {
        let forwarder = Forwarder::new(upstream.port(), pool_config);
        Arc::new(Self {
            gate: ReadinessGate::new(),
            upstream,
            forwarder,
        })
    }

    pub fn from_config(config: &Config) -> Arc<Self> {
        let pool_config = PoolConfig {
            max_idle_per_host: config.server.pool_max_idle_per_host,
            idle_timeout: Duration::from_secs(config.server.pool_idle_timeout_secs),
        };
        Self::new(UpstreamManager::new(config.upstream.clone()), pool_config)
    }

    pub fn state(&self) -> GateState {
        self.gate.state()
    }

    /// Number of requests waiting for the upstream
    pub fn queued(&self) -> usize {
        self.gate.queued()
    }

    pub fn upstream(&self) -> &Arc<UpstreamManager> {
        &self.upstream
    }

    pub fn stats(&self) -> Arc<ForwardStats> {
        self.forwarder.stats()
    }

    /// Handle one request. Always produces a response.
    pub async fn handle(self: &Arc<Self>, request: ProxyRequest) -> ProxyResponse {
        match self.gate.admit(request) {
            Admission::Forward(request) => self.forwarder.forward(request).await,
            Admission::Queued { reply, boot } => {
                if boot {
                    self.spawn_boot();
                }
                match reply.await {
                    Ok(response) => response,
                    Err(_) => ProxyResponse::error(
                        ProxyErrorCode::InternalError,
                        "Request dropped before dispatch",
                    ),
                }
            }
        }
    }

    /// Boot in a detached task so a client disconnecting mid-startup cannot
    /// cancel it.
    fn spawn_boot(self: &Arc<Self>) {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            gateway.boot().await;
        });
    }

    async fn boot(&self) {
        match self.upstream.ensure_started().await {
            Ok(outcome) => {
                let pending = self.gate.open();
                info!(?outcome, queued = pending.len(), "Upstream ready, draining queued requests");

                for request in pending {
                    let (request, responder) = request.into_parts();
                    let response = self.forwarder.forward(request).await;
                    responder.send(response);
                }
                debug!("Queue drained");
            }
            Err(e) => {
                let pending = self.gate.fail();
                error!(error = %e, queued = pending.len(), "Failed to start upstream, failing queued requests");

                for request in pending {
                    request.respond(ProxyResponse::error(
                        ProxyErrorCode::StartupFailed,
                        STARTUP_FAILED_MESSAGE,
                    ));
                }
            }
        }
    }

    /// Stop the upstream application
    pub async fn shutdown(&self) {
        self.upstream.stop().await;
    }
}
