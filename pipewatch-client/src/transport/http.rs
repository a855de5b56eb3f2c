//! reqwest-backed transport

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error};

use super::{ApiRequest, ApiResponse, LineStream, Method, Transport};
use crate::error::{ClientError, Result};

/// Transport talking to a real API server
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// Base URL of the API server (e.g., "https://api.cluster.example:6443")
    base_url: String,
    /// Bearer token attached to every request
    token: Option<String>,
    /// HTTP client instance
    client: Client,
}

impl HttpTransport {
    /// Create a new transport
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self::with_client(base_url, token, Client::new())
    }

    /// Create a new transport with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, token: Option<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        }
    }

    /// Get the base URL of the API server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn build(&self, request: &ApiRequest) -> reqwest::RequestBuilder {
        let url = self.url(&request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Patch => self.client.patch(&url),
        };

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        builder
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        debug!("{:?} {}", request.method, request.path);
        let response = self.build(&request).send().await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(ApiResponse { status, body })
    }

    async fn stream(&self, request: ApiRequest) -> Result<Box<dyn LineStream>> {
        debug!("streaming {}", request.path);
        let response = self.build(&request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("[{}] {}", status.as_u16(), error_text);
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(Box::new(ResponseLines::new(response)))
    }
}

/// Splits a chunked response body into lines
struct ResponseLines {
    response: reqwest::Response,
    buffer: Vec<u8>,
    finished: bool,
}

impl ResponseLines {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            buffer: Vec::new(),
            finished: false,
        }
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.buffer.iter().position(|byte| *byte == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

fn decode_line(line: Vec<u8>) -> Result<String> {
    String::from_utf8(line)
        .map_err(|e| ClientError::ParseError(format!("stream line is not valid UTF-8: {}", e)))
}

#[async_trait]
impl LineStream for ResponseLines {
    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.take_line() {
                return decode_line(line).map(Some);
            }

            if self.finished {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let rest = std::mem::take(&mut self.buffer);
                return decode_line(rest).map(Some);
            }

            match self.response.chunk().await? {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => self.finished = true,
            }
        }
    }
}
