//! Upstream Gateway: one authenticated, deadline-bounded POST to the workflow engine.
//!
//! Transport problems (refused connection, non-2xx, deadline) all come back through
//! [`AgentError`]. There is no retry and no caching: one invocation, one outbound call.

use std::time::Duration;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde_json::Value;

use crate::config::{BasicCredential, GatewayConfig};
use crate::error::{AgentError, AgentResult};

/// What the engine answered with. Some workflows legitimately reply with plain text.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamBody {
    Json(Value),
    Text(String),
}

impl UpstreamBody {
    /// JSON view of the body; text is carried as a JSON string.
    pub fn into_json(self) -> Value {
        match self {
            UpstreamBody::Json(v) => v,
            UpstreamBody::Text(s) => Value::String(s),
        }
    }
}

pub struct UpstreamClient {
    client: reqwest::Client,
    authorization: HeaderValue,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(credential: &BasicCredential, timeout: Duration) -> AgentResult<Self> {
        let mut authorization = HeaderValue::from_str(credential.header_value())
            .map_err(|e| AgentError::Configuration(format!("basic-auth header: {}", e)))?;
        authorization.set_sensitive(true);
        Ok(Self {
            client: reqwest::Client::new(),
            authorization,
            timeout,
        })
    }

    pub fn from_config(config: &GatewayConfig) -> AgentResult<Self> {
        Self::new(&config.credential, config.timeout)
    }

    /// Swap the underlying HTTP client (connection pool, proxy settings).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST `payload` (or `{}`) to `url` under the configured deadline.
    ///
    /// When the deadline elapses the in-flight exchange is dropped, which aborts the
    /// request, and the result is [`AgentError::Timeout`].
    pub async fn send(&self, url: &str, payload: Option<&Value>) -> AgentResult<UpstreamBody> {
        let after_ms = self.timeout.as_millis() as u64;
        tracing::debug!(host = %host_of(url), timeout_ms = after_ms, "[UPSTREAM] dispatch");

        let result = match tokio::time::timeout(self.timeout, self.exchange(url, payload)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(AgentError::Timeout { after_ms }),
        };

        if let Err(e) = &result {
            tracing::warn!(host = %host_of(url), kind = ?e.kind(), "[UPSTREAM] call failed: {}", e);
        }
        result
    }

    async fn exchange(&self, url: &str, payload: Option<&Value>) -> AgentResult<UpstreamBody> {
        let empty = Value::Object(Default::default());
        let body = payload.unwrap_or(&empty);

        let res = self
            .client
            .post(url)
            .header(AUTHORIZATION, self.authorization.clone())
            .json(body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            let message = if text.trim().is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                text
            };
            return Err(AgentError::UpstreamStatus {
                status: status.as_u16(),
                message,
            });
        }

        let raw = res.text().await?;
        Ok(match serde_json::from_str::<Value>(&raw) {
            Ok(v) => UpstreamBody::Json(v),
            Err(_) => UpstreamBody::Text(raw),
        })
    }
}

fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "<invalid url>".to_string())
}
