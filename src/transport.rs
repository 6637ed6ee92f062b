//! HTTP transport port.
//!
//! The session core never talks to reqwest directly; it sends requests and
//! mutates default headers through the [`Transport`] trait. [`HttpTransport`]
//! is the production implementation, tests substitute their own.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A completed HTTP exchange: status plus raw body.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).context("Failed to parse JSON response body")
    }
}

/// The capability set the session consumes from its HTTP layer: send a
/// request, and set or clear headers applied to every outgoing request.
///
/// Only the session service writes the access-token default header; across
/// rapid state flips the last writer wins.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request. `headers` are per-call headers layered over the
    /// defaults. Network-level failures are errors; HTTP error statuses are
    /// returned as a normal [`TransportResponse`].
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<TransportResponse>;

    /// Set a header sent with every subsequent request.
    fn set_default_header(&self, name: &str, value: &str);

    /// Remove a previously set default header.
    fn clear_default_header(&self, name: &str);
}

/// reqwest-backed [`Transport`].
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
pub struct HttpTransport {
    client: reqwest::Client,
    default_headers: RwLock<HashMap<String, String>>,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            default_headers: RwLock::new(HashMap::new()),
        })
    }

    /// Current value of a default header, mainly useful to hosts that want
    /// to inspect what the session last pushed.
    pub fn default_header(&self, name: &str) -> Option<String> {
        self.headers().get(name).cloned()
    }

    fn headers(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, String>> {
        self.default_headers.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<TransportResponse> {
        // Snapshot defaults before the await point; the guard must not be
        // held across it.
        let mut combined: Vec<(String, String)> = {
            let defaults = self.headers();
            defaults.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        combined.extend(headers.iter().cloned());

        let mut request = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        for (name, value) in &combined {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send request to {url}"))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {url}"))?;
        debug!(url, status, "Request completed");

        Ok(TransportResponse { status, body })
    }

    fn set_default_header(&self, name: &str, value: &str) {
        self.default_headers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), value.to_string());
    }

    fn clear_default_header(&self, name: &str) {
        self.default_headers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }
}
