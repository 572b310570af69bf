//! Request forwarding to the upstream application
//!
//! Requests go out over a pooled HTTP client to the loopback port. Responses
//! are buffered in full before being handed back, which suits the small
//! payloads this gateway relays.

use crate::error::ForwardError;
use crate::message::{ProxyRequest, ProxyResponse};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Counters for forwarded traffic
#[derive(Debug, Default)]
pub struct ForwardStats {
    /// Requests that produced an upstream response
    pub forwarded: AtomicU64,
    /// Requests answered with a synthesized error
    pub failed: AtomicU64,
}

impl ForwardStats {
    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn get_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Configuration for the upstream connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum idle connections kept to the upstream
    pub max_idle_per_host: usize,
    /// Idle connection timeout
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Forwards buffered requests to `127.0.0.1:<port>`
pub struct Forwarder {
    client: Client<HttpConnector, Full<Bytes>>,
    port: u16,
    stats: Arc<ForwardStats>,
}

impl Forwarder {
    pub fn new(port: u16, config: PoolConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .build(connector);

        debug!(
            port,
            max_idle = config.max_idle_per_host,
            idle_timeout_secs = config.idle_timeout.as_secs(),
            "Upstream client initialized"
        );

        Self {
            client,
            port,
            stats: Arc::new(ForwardStats::default()),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn stats(&self) -> Arc<ForwardStats> {
        Arc::clone(&self.stats)
    }

    /// Forward a request and relay the upstream response.
    ///
    /// Never fails: any error is turned into a synthesized 500 with a JSON
    /// `{"error": ...}` body.
    pub async fn forward(&self, req: ProxyRequest) -> ProxyResponse {
        let method = req.method.clone();
        let path = req.path.clone();

        match self.try_forward(req).await {
            Ok(response) => {
                self.stats.record_forwarded();
                debug!(%method, path, status = response.status.as_u16(), "Forwarded request");
                response
            }
            Err(e) => {
                self.stats.record_failed();
                error!(%method, path, port = self.port, error = %e, "Error proxying request");
                ProxyResponse::error(e.code(), e.to_string())
            }
        }
    }

    async fn try_forward(&self, req: ProxyRequest) -> Result<ProxyResponse, ForwardError> {
        let upstream_req = self.build_request(req)?;

        let response = self.client.request(upstream_req).await?;

        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();

        Ok(ProxyResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    fn build_request(&self, req: ProxyRequest) -> Result<Request<Full<Bytes>>, ForwardError> {
        let path = if req.path.is_empty() { "/" } else { req.path.as_str() };
        let uri = format!("http://127.0.0.1:{}{}", self.port, path);

        let body = if req.carries_body() { req.body.clone() } else { Bytes::new() };

        let mut builder = Request::builder().method(req.method.clone()).uri(uri);

        for (key, value) in req.headers.iter() {
            builder = builder.header(key, value);
        }

        Ok(builder.body(Full::new(body))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::X_PROXY_ERROR;
    use hyper::header::HeaderValue;
    use hyper::{Method, StatusCode};

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.max_idle_per_host, 10);
        assert_eq!(config.idle_timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_stats() {
        let stats = ForwardStats::default();
        assert_eq!(stats.get_forwarded(), 0);
        assert_eq!(stats.get_failed(), 0);

        stats.record_forwarded();
        stats.record_forwarded();
        stats.record_failed();

        assert_eq!(stats.get_forwarded(), 2);
        assert_eq!(stats.get_failed(), 1);
    }

    #[tokio::test]
    async fn test_build_request_keeps_method_path_and_headers() {
        let forwarder = Forwarder::new(3000, PoolConfig::default());

        let mut req = ProxyRequest::new(Method::POST, "/api/labels?batch=5").with_body("payload");
        req.headers.insert("x-custom", HeaderValue::from_static("kept"));
        req.headers.append("accept", HeaderValue::from_static("text/html"));
        req.headers.append("accept", HeaderValue::from_static("application/json"));

        let built = forwarder.build_request(req).unwrap();

        assert_eq!(built.method(), Method::POST);
        assert_eq!(built.uri(), "http://127.0.0.1:3000/api/labels?batch=5");
        assert_eq!(built.headers().get("x-custom").unwrap(), "kept");
        assert_eq!(built.headers().get_all("accept").iter().count(), 2);

        let body = built.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn test_build_request_drops_body_for_get() {
        let forwarder = Forwarder::new(3000, PoolConfig::default());
        let req = ProxyRequest::new(Method::GET, "/").with_body("ignored");

        let built = forwarder.build_request(req).unwrap();
        let body = built.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_request_build_failure_becomes_json_500() {
        let forwarder = Forwarder::new(3000, PoolConfig::default());

        // A space is not a valid URI character
        let req = ProxyRequest::new(Method::GET, "/label sheet");
        assert!(matches!(
            forwarder.build_request(req.clone()),
            Err(ForwardError::RequestBuild(_))
        ));

        let response = forwarder.forward(req).await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers.get(X_PROXY_ERROR).unwrap(), "REQUEST_BUILD");
        let value: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert!(value["error"].as_str().is_some_and(|s| !s.is_empty()));
        assert_eq!(value["code"], "REQUEST_BUILD");
        assert_eq!(forwarder.stats().get_failed(), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_becomes_json_500() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let forwarder = Forwarder::new(port, PoolConfig::default());
        let response = forwarder.forward(ProxyRequest::new(Method::GET, "/labels")).await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        let value: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert!(value["error"].is_string());
        assert_eq!(forwarder.stats().get_failed(), 1);
    }
}
