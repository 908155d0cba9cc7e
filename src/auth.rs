//! One-shot login that yields the bearer token shared by every virtual user.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sonic_rs::JsonValueTrait;
use tracing::{error, info};
use url::Url;

use crate::error::AuthError;
use crate::metrics::{names, MetricsCollector};
use crate::transport::{HttpRequest, Transport};

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub url: Url,
    pub credentials: Credentials,
    /// Dotted path to the token in the response, e.g. `data.login.token`.
    pub token_field: String,
    pub timeout: Duration,
}

/// Bearer credential shared read-only by every virtual user for the run.
#[derive(Debug, Clone)]
pub struct AuthSession {
    token: String,
    acquired_at: DateTime<Utc>,
}

impl AuthSession {
    /// Logs in once. Any failure is fatal for the run and is not retried.
    pub async fn acquire(
        transport: &dyn Transport,
        config: &AuthConfig,
        metrics: &MetricsCollector,
    ) -> Result<Self, AuthError> {
        let result = Self::login(transport, config, metrics).await;
        if let Err(e) = &result {
            error!("Authentication against {} failed: {}", config.url, e);
        }
        result
    }

    async fn login(
        transport: &dyn Transport,
        config: &AuthConfig,
        metrics: &MetricsCollector,
    ) -> Result<Self, AuthError> {
        let body = sonic_rs::to_string(&config.credentials)
            .map_err(|e| AuthError::Unparseable(e.to_string()))?;
        let request = HttpRequest {
            url: config.url.clone(),
            body,
            headers: Vec::new(),
            timeout: config.timeout,
        };

        let start = Instant::now();
        let response = transport.send(request).await;
        metrics.add_duration(names::AUTH_DURATION, start.elapsed(), None);
        let response = response?;

        if !response.is_success() {
            return Err(AuthError::Status {
                status: response.status,
                body: response.body,
            });
        }

        let token = extract_token(&response.body, &config.token_field)?;
        info!("Authenticated as {}", config.credentials.username);

        Ok(Self {
            token,
            acquired_at: Utc::now(),
        })
    }

    pub fn from_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            acquired_at: Utc::now(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.token)
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }
}

fn extract_token(body: &str, field: &str) -> Result<String, AuthError> {
    let value: sonic_rs::Value =
        sonic_rs::from_str(body).map_err(|e| AuthError::Unparseable(e.to_string()))?;

    let mut current = &value;
    for segment in field.split('.') {
        current = current
            .get(segment)
            .ok_or_else(|| AuthError::MissingToken(field.to_string()))?;
    }

    match current.as_str() {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(AuthError::MissingToken(field.to_string())),
    }
}
