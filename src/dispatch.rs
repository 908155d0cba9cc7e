//! Sending one tagged request and turning the response into metrics.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use sonic_rs::{JsonContainerTrait, JsonValueTrait};
use tracing::{debug, warn};
use url::Url;

use crate::auth::AuthSession;
use crate::catalog::RequestTemplate;
use crate::error::ParseError;
use crate::metrics::{names, MetricsCollector};
use crate::transport::{HttpRequest, Timings, Transport};

pub const QUERY_TAG_HEADER: &str = "X-Query-Name";
pub const CHECK_STATUS: &str = "status is 2xx";
pub const CHECK_NO_ERRORS: &str = "no graphql errors";

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: &'a BTreeMap<String, sonic_rs::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBody {
    pub data: Option<sonic_rs::Value>,
    pub errors: Option<Vec<sonic_rs::Value>>,
}

fn member<'a>(root: &'a sonic_rs::Value, key: &str) -> Option<&'a sonic_rs::Value> {
    root.get(key).filter(|v| !v.is_null())
}

/// Reads a GraphQL response envelope. A non-array `errors` member is kept as
/// a single error; only invalid JSON or a non-object document is rejected.
pub fn parse(body: &str) -> Result<ParsedBody, ParseError> {
    let root: sonic_rs::Value =
        sonic_rs::from_str(body).map_err(|e| ParseError(e.to_string()))?;
    if !root.is_object() {
        return Err(ParseError("response is not a JSON object".to_string()));
    }

    let errors = member(&root, "errors").map(|errors| match errors.as_array() {
        Some(list) => list.iter().cloned().collect(),
        None => vec![errors.clone()],
    });

    Ok(ParsedBody {
        data: member(&root, "data").cloned(),
        errors,
    })
}

// =============================================================================
// Outcome
// =============================================================================

#[derive(Debug, Clone)]
pub struct RequestOutcome {
    /// `None` when no response arrived.
    pub status: Option<u16>,
    pub timings: Timings,
    pub body_parsed: bool,
    pub application_errors: Vec<sonic_rs::Value>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Transport or parse failure description.
    pub failure: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success,
    TransportFailure(String),
    ApplicationErrors(usize),
}

impl RequestOutcome {
    pub fn status_ok(&self) -> bool {
        matches!(self.status, Some(status) if (200..300).contains(&status))
    }

    pub fn classify(&self) -> Classification {
        match self.status {
            None => Classification::TransportFailure(
                self.failure.clone().unwrap_or_else(|| "no response".to_string()),
            ),
            Some(status) if !self.status_ok() => {
                Classification::TransportFailure(format!("status {}", status))
            }
            Some(_) if !self.body_parsed => Classification::TransportFailure(
                self.failure
                    .clone()
                    .unwrap_or_else(|| "unparseable body".to_string()),
            ),
            Some(_) if !self.application_errors.is_empty() => {
                Classification::ApplicationErrors(self.application_errors.len())
            }
            Some(_) => Classification::Success,
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

#[derive(Clone)]
pub struct RequestDispatcher {
    transport: Arc<dyn Transport>,
    endpoint: Url,
    timeout: Duration,
    metrics: MetricsCollector,
}

impl RequestDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoint: Url,
        timeout: Duration,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            transport,
            endpoint,
            timeout,
            metrics,
        }
    }

    /// Sends the template once. Never retries; every failure is folded into
    /// the returned outcome.
    pub async fn dispatch(&self, template: &RequestTemplate, session: &AuthSession) -> RequestOutcome {
        let payload = GraphQlRequest {
            query: &template.body,
            variables: &template.variables,
        };
        let body = match sonic_rs::to_string(&payload) {
            Ok(body) => body,
            Err(e) => {
                return RequestOutcome {
                    status: None,
                    timings: Timings::default(),
                    body_parsed: false,
                    application_errors: Vec::new(),
                    bytes_sent: 0,
                    bytes_received: 0,
                    failure: Some(format!("failed to encode request: {}", e)),
                    body: String::new(),
                };
            }
        };
        let bytes_sent = body.len() as u64;

        let request = HttpRequest {
            url: self.endpoint.clone(),
            body,
            headers: vec![
                ("Authorization".to_string(), session.authorization()),
                (QUERY_TAG_HEADER.to_string(), template.name.clone()),
            ],
            timeout: self.timeout,
        };

        let start = Instant::now();
        match self.transport.send(request).await {
            Ok(response) => {
                let (body_parsed, application_errors, failure) = match parse(&response.body) {
                    Ok(parsed) => (true, parsed.errors.unwrap_or_default(), None),
                    Err(e) => (false, Vec::new(), Some(e.to_string())),
                };
                RequestOutcome {
                    status: Some(response.status),
                    timings: response.timings,
                    body_parsed,
                    application_errors,
                    bytes_sent,
                    bytes_received: response.body.len() as u64,
                    failure,
                    body: response.body,
                }
            }
            Err(e) => RequestOutcome {
                status: None,
                timings: Timings {
                    total: start.elapsed(),
                    ..Timings::default()
                },
                body_parsed: false,
                application_errors: Vec::new(),
                bytes_sent,
                bytes_received: 0,
                failure: Some(e.to_string()),
                body: String::new(),
            },
        }
    }

    /// Emits the observations for one outcome exactly once and returns its
    /// classification.
    pub fn record(&self, query: &str, outcome: &RequestOutcome) -> Classification {
        let metrics = &self.metrics;
        let tag = Some(query);

        metrics.add_counter(names::HTTP_REQS, 1, tag);
        metrics.add_counter(names::DATA_SENT, outcome.bytes_sent, None);
        metrics.add_counter(names::DATA_RECEIVED, outcome.bytes_received, None);

        if outcome.status.is_some() {
            let t = &outcome.timings;
            metrics.add_duration(names::HTTP_REQ_DURATION, t.total, tag);
            let measured = [
                (names::HTTP_REQ_BLOCKED, t.blocked),
                (names::HTTP_REQ_CONNECTING, t.connecting),
                (names::HTTP_REQ_TLS_HANDSHAKING, t.tls_handshaking),
                (names::HTTP_REQ_SENDING, t.sending),
            ];
            for (name, phase) in measured {
                if let Some(phase) = phase {
                    metrics.add_duration(name, phase, None);
                }
            }
            metrics.add_duration(names::HTTP_REQ_WAITING, t.waiting, None);
            metrics.add_duration(names::HTTP_REQ_RECEIVING, t.receiving, None);
        }

        let classification = outcome.classify();
        match &classification {
            Classification::TransportFailure(reason) => {
                metrics.add_counter(names::HTTP_REQ_FAILED, 1, tag);
                warn!("Query {} failed: {} - Body: {}", query, reason, outcome.body);
            }
            Classification::ApplicationErrors(count) => {
                metrics.add_counter(names::GRAPHQL_ERRORS, 1, tag);
                warn!(
                    "Query {} returned {} errors: {:?}",
                    query, count, outcome.application_errors
                );
            }
            Classification::Success => {
                debug!("Query {} succeeded in {:?}", query, outcome.timings.total);
            }
        }

        self.check(CHECK_STATUS, outcome.status_ok());
        self.check(
            CHECK_NO_ERRORS,
            outcome.body_parsed && outcome.application_errors.is_empty(),
        );

        classification
    }

    fn check(&self, name: &str, passed: bool) {
        let metric = if passed {
            names::CHECKS_PASSED
        } else {
            names::CHECKS_FAILED
        };
        self.metrics.add_counter(metric, 1, Some(name));
    }
}
