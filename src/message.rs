//! Owned request and response values passed through the gateway
//!
//! Inbound bodies are read in full before a request is admitted, so a request
//! parked in the readiness queue owns everything needed to forward it later.

use crate::error::{json_error_response, ProxyErrorCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{HeaderMap, Method, Request, Response, StatusCode};

/// A fully buffered inbound request
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Path plus query string, forwarded verbatim
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Whether the body travels upstream. GET and HEAD are sent bodiless.
    pub fn carries_body(&self) -> bool {
        self.method != Method::GET && self.method != Method::HEAD
    }

    /// Read an inbound hyper request into an owned value
    pub async fn from_incoming(req: Request<Incoming>) -> Result<Self, hyper::Error> {
        let (parts, body) = req.into_parts();
        let body = body.collect().await?.to_bytes();

        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        Ok(Self {
            method: parts.method,
            path,
            headers: parts.headers,
            body,
        })
    }
}

/// A fully buffered response, either relayed from upstream or synthesized
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    /// Synthesized failure response
    pub fn error(code: ProxyErrorCode, message: impl Into<String>) -> Self {
        json_error_response(code, message)
    }

    pub fn into_response(self) -> Response<BoxBody<Bytes, hyper::Error>> {
        let mut response = Response::new(Full::new(self.body).map_err(|never| match never {}).boxed());
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    #[test]
    fn test_get_and_head_are_bodiless() {
        assert!(!ProxyRequest::new(Method::GET, "/").carries_body());
        assert!(!ProxyRequest::new(Method::HEAD, "/").carries_body());
        assert!(ProxyRequest::new(Method::POST, "/").carries_body());
        assert!(ProxyRequest::new(Method::PUT, "/").carries_body());
        assert!(ProxyRequest::new(Method::DELETE, "/").carries_body());
    }

    #[test]
    fn test_into_response_keeps_status_and_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-label", HeaderValue::from_static("batch-5"));
        let response = ProxyResponse {
            status: StatusCode::CREATED,
            headers,
            body: Bytes::from_static(b"ok"),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get("x-label").unwrap(), "batch-5");
    }
}
