//! The HTTP collaborator the engine sends through.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::error::TransportError;

/// Per-phase timing of one request. Connection-level phases are `None` when
/// the transport cannot observe them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Timings {
    pub blocked: Option<Duration>,
    pub connecting: Option<Duration>,
    pub tls_handshaking: Option<Duration>,
    pub sending: Option<Duration>,
    pub waiting: Duration,
    pub receiving: Duration,
    pub total: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: Url,
    pub body: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub timings: Timings,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a POST. An `Err` means no response arrived; error statuses come
    /// back as `Ok`.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

// =============================================================================
// reqwest transport
// =============================================================================

/// Pooled reqwest client. Connection setup is hidden by the pool, so the
/// blocked, connecting, TLS and sending phases are left unmeasured and their
/// time is folded into `waiting`.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

fn map_error(e: reqwest::Error, timeout: Duration) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(timeout)
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let timeout = request.timeout;
        let mut builder = self
            .client
            .post(request.url)
            .timeout(timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let start = Instant::now();
        let response = builder.send().await.map_err(|e| map_error(e, timeout))?;
        let waiting = start.elapsed();

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| map_error(e, timeout))?;
        let total = start.elapsed();

        Ok(HttpResponse {
            status,
            body,
            timings: Timings {
                waiting,
                receiving: total.saturating_sub(waiting),
                total,
                ..Timings::default()
            },
        })
    }
}
