//! Timeout and retry wrapper used by every venue call.
//!
//! Retries 429 and 5xx responses with exponential backoff, and retries
//! timeouts and connection failures with a shorter backoff. No other module
//! retries on its own.

use crate::config::HttpConfig;
use crate::error::{EngineError, EngineResult};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// A request that can be rebuilt for every attempt.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            body: Some(body),
        }
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self {
            method: Method::DELETE,
            url: url.into(),
            body: None,
        }
    }

    /// URL path without host or query, for logs and errors.
    pub fn endpoint(&self) -> String {
        let without_scheme = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        let path = without_scheme
            .find('/')
            .map(|i| &without_scheme[i..])
            .unwrap_or("/");
        path.split('?').next().unwrap_or(path).to_string()
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub status_backoff: Duration,
    pub transport_backoff: Duration,
}

impl From<&HttpConfig> for RetryPolicy {
    fn from(config: &HttpConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_retries: config.max_retries,
            status_backoff: Duration::from_millis(config.status_backoff_ms),
            transport_backoff: Duration::from_millis(config.transport_backoff_ms),
        }
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16))
}

fn is_recoverable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub struct ResilientClient {
    http: Client,
    policy: RetryPolicy,
}

impl ResilientClient {
    /// Build a client that sends `headers` on every request.
    pub fn new(config: &HttpConfig, headers: &[(&str, &str)]) -> Result<Self> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            header_map.insert(
                HeaderName::from_bytes(name.as_bytes())
                    .with_context(|| format!("Invalid header name {name}"))?,
                HeaderValue::from_str(value)
                    .with_context(|| format!("Invalid value for header {name}"))?,
            );
        }

        let http = Client::builder()
            .default_headers(header_map)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            policy: RetryPolicy::from(config),
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send with the configured timeout and retry budget.
    pub async fn send(&self, request: &HttpRequest) -> EngineResult<Response> {
        self.call(request, self.policy.timeout, self.policy.max_retries)
            .await
    }

    /// Send `request`, retrying recoverable failures up to `max_retries` times.
    ///
    /// Returns the last response when a recoverable status outlives the
    /// budget, and a `Network` error when a transport failure does.
    pub async fn call(
        &self,
        request: &HttpRequest,
        timeout: Duration,
        max_retries: u32,
    ) -> EngineResult<Response> {
        let endpoint = request.endpoint();
        let mut attempt = 0u32;

        loop {
            let mut builder = self
                .http
                .request(request.method.clone(), &request.url)
                .timeout(timeout);
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if is_recoverable(status) && attempt < max_retries {
                        let delay = backoff(self.policy.status_backoff, attempt);
                        warn!(
                            %endpoint,
                            status = status.as_u16(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Recoverable status, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    debug!(%endpoint, status = status.as_u16(), attempt, "Venue call complete");
                    return Ok(response);
                }
                Err(e) if (e.is_timeout() || e.is_connect() || e.is_request()) && attempt < max_retries => {
                    let delay = backoff(self.policy.transport_backoff, attempt);
                    warn!(
                        %endpoint,
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transport failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(EngineError::network(endpoint, e)),
            }
        }
    }

    /// Send and decode a successful JSON body.
    pub async fn json<T: DeserializeOwned>(&self, request: &HttpRequest) -> EngineResult<T> {
        let response = ensure_success(self.send(request).await?, request).await?;
        decode_json(response, request).await
    }

    /// Like [`json`](Self::json) but maps 404 to `None`.
    pub async fn json_opt<T: DeserializeOwned>(
        &self,
        request: &HttpRequest,
    ) -> EngineResult<Option<T>> {
        let response = self.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response, request).await?;
        decode_json(response, request).await.map(Some)
    }

    /// Send and discard the body of a successful response.
    pub async fn execute(&self, request: &HttpRequest) -> EngineResult<()> {
        ensure_success(self.send(request).await?, request).await?;
        Ok(())
    }
}

/// Convert a non-2xx response into a `VenueRejection`.
pub async fn ensure_success(response: Response, request: &HttpRequest) -> EngineResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(EngineError::VenueRejection {
        endpoint: request.endpoint(),
        status: status.as_u16(),
        body: body.chars().take(512).collect(),
    })
}

async fn decode_json<T: DeserializeOwned>(
    response: Response,
    request: &HttpRequest,
) -> EngineResult<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| EngineError::network(request.endpoint(), e))?;
    serde_json::from_slice(&bytes).map_err(|e| EngineError::decode(request.endpoint(), e))
}
