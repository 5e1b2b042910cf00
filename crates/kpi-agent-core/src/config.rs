//! Gateway configuration loaded from the environment (`.env` is loaded by the binary).
//!
//! Required values fail fast with [`AgentError::Configuration`]; nothing silently
//! defaults to an empty upstream URL or credential.

use std::fmt;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{AgentError, AgentResult};

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";

pub const ENV_AGENT_URL: &str = "WORKFLOW_AGENT_URL";
pub const ENV_INGEST_URL: &str = "WORKFLOW_INGEST_URL";
pub const ENV_BASIC_USER: &str = "WORKFLOW_BASIC_AUTH_USER";
pub const ENV_BASIC_PASSWORD: &str = "WORKFLOW_BASIC_AUTH_PASSWORD";
pub const ENV_TIMEOUT_MS: &str = "WORKFLOW_TIMEOUT_MS";
pub const ENV_BIND_ADDR: &str = "GATEWAY_BIND";

/// Pre-encoded `Authorization` value for the upstream engine.
///
/// Built once at startup from the two secrets and shared by every call.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredential {
    header_value: String,
}

impl BasicCredential {
    pub fn new(user: &str, password: &str) -> Self {
        let encoded = STANDARD.encode(format!("{}:{}", user, password));
        Self {
            header_value: format!("Basic {}", encoded),
        }
    }

    /// Full header value, e.g. `Basic dXNlcjpwYXNz`.
    pub fn header_value(&self) -> &str {
        &self.header_value
    }
}

impl fmt::Debug for BasicCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BasicCredential(<redacted>)")
    }
}

/// Gateway configuration.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | WORKFLOW_AGENT_URL | required | Agent workflow endpoint (query path). |
/// | WORKFLOW_INGEST_URL | unset | Ingestion workflow endpoint; checked when `/ingest` is called. |
/// | WORKFLOW_BASIC_AUTH_USER | required | Basic-auth user for the upstream engine. |
/// | WORKFLOW_BASIC_AUTH_PASSWORD | required | Basic-auth password for the upstream engine. |
/// | WORKFLOW_TIMEOUT_MS | 10000 | Deadline per upstream call, positive integer. |
/// | GATEWAY_BIND | 127.0.0.1:8000 | Listen address of the HTTP surface. |
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub agent_url: String,
    pub ingest_url: Option<String>,
    pub credential: BasicCredential,
    pub timeout: Duration,
    pub bind_addr: String,
}

impl GatewayConfig {
    pub fn from_env() -> AgentResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> AgentResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |name: &str| {
            get(name).ok_or_else(|| {
                AgentError::Configuration(format!("required env var missing: {}", name))
            })
        };

        let agent_url = require(ENV_AGENT_URL)?;
        let user = require(ENV_BASIC_USER)?;
        let password = require(ENV_BASIC_PASSWORD)?;

        let timeout_ms = match get(ENV_TIMEOUT_MS) {
            Some(raw) => match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => ms,
                _ => {
                    return Err(AgentError::Configuration(format!(
                        "{} must be a positive integer of milliseconds, got {:?}",
                        ENV_TIMEOUT_MS, raw
                    )))
                }
            },
            None => DEFAULT_TIMEOUT_MS,
        };

        Ok(Self {
            agent_url,
            ingest_url: get(ENV_INGEST_URL),
            credential: BasicCredential::new(&user, &password),
            timeout: Duration::from_millis(timeout_ms),
            bind_addr: get(ENV_BIND_ADDR).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        })
    }

    /// Ingest endpoint, or a configuration error when it was never set.
    pub fn require_ingest_url(&self) -> AgentResult<&str> {
        self.ingest_url.as_deref().ok_or_else(|| {
            AgentError::Configuration(format!("required env var missing: {}", ENV_INGEST_URL))
        })
    }
}
