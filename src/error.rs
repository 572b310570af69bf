//! Error types and synthesized JSON error responses
//!
//! Every failure the gateway can hit ends as a terminal 500 response with a
//! JSON body carrying an `error` field. Nothing is retried.

use crate::message::ProxyResponse;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{HeaderMap, StatusCode};
use serde::Serialize;
use std::process::ExitStatus;

/// Header carrying the machine-readable error code
pub const X_PROXY_ERROR: &str = "x-proxy-error";

/// Error codes for synthesized responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProxyErrorCode {
    /// The upstream install or launch step failed
    StartupFailed,
    /// Could not reach the upstream application
    ConnectionFailed,
    /// The outbound request could not be constructed
    RequestBuild,
    /// The inbound request body could not be read
    BadRequestBody,
    /// The request was dropped before a response was produced
    InternalError,
}

impl ProxyErrorCode {
    /// Get the error code as a string for the X-Proxy-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            ProxyErrorCode::StartupFailed => "STARTUP_FAILED",
            ProxyErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ProxyErrorCode::RequestBuild => "REQUEST_BUILD",
            ProxyErrorCode::BadRequestBody => "BAD_REQUEST_BODY",
            ProxyErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
    /// The error code
    pub code: ProxyErrorCode,
}

impl ErrorResponse {
    pub fn new(code: ProxyErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code,
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"{}","code":"{}"}}"#,
                self.error.replace('\\', "\\\\").replace('"', "\\\""),
                self.code.as_header_value()
            )
        })
    }
}

/// Build a synthesized 500 response with a JSON `{"error": ...}` body
pub fn json_error_response(code: ProxyErrorCode, message: impl Into<String>) -> ProxyResponse {
    let body = ErrorResponse::new(code, message).to_json();

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(X_PROXY_ERROR, HeaderValue::from_static(code.as_header_value()));

    ProxyResponse {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        headers,
        body: Bytes::from(body),
    }
}

/// Failure of one boot attempt of the upstream application
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to spawn install command `{command}`: {source}")]
    InstallSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("install command failed with {status}")]
    InstallFailed { status: ExitStatus },

    #[error("failed to launch application `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("application exited before signalling readiness ({status})")]
    Exited { status: ExitStatus },

    #[error("invalid command line: {0}")]
    Command(String),
}

/// Network-level failure reaching the upstream application
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("failed to build upstream request: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("upstream request failed: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),

    #[error("failed to read upstream response: {0}")]
    Body(#[from] hyper::Error),
}

impl ForwardError {
    pub fn code(&self) -> ProxyErrorCode {
        match self {
            ForwardError::RequestBuild(_) => ProxyErrorCode::RequestBuild,
            ForwardError::Client(_) | ForwardError::Body(_) => ProxyErrorCode::ConnectionFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_json_has_error_field() {
        let json = ErrorResponse::new(ProxyErrorCode::ConnectionFailed, "connection refused").to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["error"], "connection refused");
        assert_eq!(value["code"], "CONNECTION_FAILED");
    }

    #[test]
    fn test_json_error_response_is_500() {
        let response = json_error_response(ProxyErrorCode::StartupFailed, "Failed to start server");

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(response.headers.get(X_PROXY_ERROR).unwrap(), "STARTUP_FAILED");

        let value: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(value["error"], "Failed to start server");
    }

    #[test]
    fn test_message_with_quotes_stays_valid_json() {
        let response = json_error_response(ProxyErrorCode::InternalError, r#"bad "thing" \ here"#);
        let value: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(value["error"], r#"bad "thing" \ here"#);
    }

    #[test]
    fn test_error_code_header_values() {
        assert_eq!(ProxyErrorCode::StartupFailed.as_header_value(), "STARTUP_FAILED");
        assert_eq!(ProxyErrorCode::BadRequestBody.as_header_value(), "BAD_REQUEST_BODY");
    }
}
