//! HTTP transport seam
//!
//! Everything above this layer speaks in `ApiRequest` / `ApiResponse` and
//! line streams, so the watch, tracker and log logic can be exercised
//! against a scripted backend.

mod http;

#[cfg(test)]
pub(crate) mod fake;

pub use http::HttpTransport;

use async_trait::async_trait;

use crate::error::Result;

/// HTTP method used by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
}

/// A request relative to the API server base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// JSON POST
    pub fn post(path: impl Into<String>, body: String) -> Self {
        Self::new(Method::Post, path)
            .with_header("Content-Type", "application/json")
            .with_header("Accept", "application/json")
            .with_body(body)
    }

    /// JSON merge-patch
    pub fn merge_patch(path: impl Into<String>, body: String) -> Self {
        Self::new(Method::Patch, path)
            .with_header("Content-Type", "application/merge-patch+json")
            .with_header("Accept", "application/json")
            .with_body(body)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// First value of a query parameter
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A fully read response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking-read source of response lines
#[async_trait]
pub trait LineStream: Send {
    /// Next line without its terminator, `None` once the server closed the
    /// stream
    async fn next_line(&mut self) -> Result<Option<String>>;
}

/// Transport used by the client
///
/// Implementations carry no per-call state that affects correctness and may
/// be shared across trackers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a request and reads the whole body, whatever the status
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;

    /// Opens a streaming response. Non-2xx statuses fail with
    /// `ClientError::ApiError` carrying the body.
    async fn stream(&self, request: ApiRequest) -> Result<Box<dyn LineStream>>;
}
