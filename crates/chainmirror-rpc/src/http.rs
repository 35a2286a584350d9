//! HTTP JSON-RPC transport backed by `reqwest`.
//!
//! Every attempt passes the endpoint's token bucket first; transient failures
//! (connection errors, timeouts, 429, 5xx) are retried with doubling delays.
//! Node-side errors are returned immediately so callers such as the log
//! scanner can react to them.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_retry::RetryIf;

use crate::error::TransportError;
use crate::policy::{RateLimitConfig, RateLimiter, RetryConfig};
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::RpcTransport;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Per-request timeout, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            request_timeout_ms: default_timeout_ms(),
        }
    }
}

pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    retry: RetryConfig,
    limiter: RateLimiter,
    timeout_ms: u64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, config: HttpConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            retry: config.retry,
            limiter: RateLimiter::new(config.rate_limit),
            timeout_ms: config.request_timeout_ms,
        })
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        self.limiter.acquire().await;

        let resp = self
            .http
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout { ms: self.timeout_ms }
                } else {
                    TransportError::Http(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(TransportError::RateLimited {
                provider: self.url.clone(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let mut attempt = 0u32;
        let method = req.method.clone();
        RetryIf::spawn(
            self.retry.delays(),
            || self.send_once(&req),
            |e: &TransportError| {
                attempt += 1;
                let retry = e.is_retryable();
                if retry {
                    tracing::warn!(
                        attempt,
                        method = %method,
                        error = %e,
                        url = %self.url,
                        "transient RPC failure"
                    );
                }
                retry
            },
        )
        .await
    }

    fn url(&self) -> &str {
        &self.url
    }
}
