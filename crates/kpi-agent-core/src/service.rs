//! Agent Service: wires validation, the upstream gateway, and the response schema together.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::config::GatewayConfig;
use crate::error::AgentResult;
use crate::request::validate_text;
use crate::schema::AgentResponse;
use crate::upstream::UpstreamClient;

/// Anything that can answer a KPI question with a validated response.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn query(&self, question: &str) -> AgentResult<AgentResponse>;
}

/// Terminal result of an ingestion run. `data` is whatever the engine returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub data: Value,
    pub rows_loaded: Option<u64>,
}

pub struct AgentService {
    config: GatewayConfig,
    client: UpstreamClient,
}

impl AgentService {
    pub fn new(config: GatewayConfig, client: UpstreamClient) -> Self {
        Self { config, client }
    }

    pub fn from_config(config: GatewayConfig) -> AgentResult<Self> {
        let client = UpstreamClient::from_config(&config)?;
        Ok(Self::new(config, client))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Validate the question, forward it, and check the answer against the schema.
    pub async fn ask(&self, question: &str) -> AgentResult<AgentResponse> {
        let question = validate_text(question)?;
        let envelope = serde_json::json!({ "question": question });
        let body = self.client.send(&self.config.agent_url, Some(&envelope)).await?;
        let response = AgentResponse::from_upstream(body)?;
        tracing::info!(
            has_cac = response.cac.is_some(),
            has_roas = response.roas.is_some(),
            "[AGENT] answer validated"
        );
        Ok(response)
    }

    /// Trigger the one-shot ingestion workflow and wait for its terminal result.
    pub async fn ingest(&self) -> AgentResult<IngestOutcome> {
        let url = self.config.require_ingest_url()?;
        let data = self.client.send(url, None).await?.into_json();
        let rows_loaded = rows_loaded(&data);
        tracing::info!(rows_loaded = ?rows_loaded, "[INGEST] workflow finished");
        Ok(IngestOutcome { data, rows_loaded })
    }
}

#[async_trait]
impl AgentBackend for AgentService {
    async fn query(&self, question: &str) -> AgentResult<AgentResponse> {
        self.ask(question).await
    }
}

/// Row count reported by the ingestion workflow, wherever it put it.
///
/// Looks at `rows_loaded`, `loaded`, then `metrics.rows_loaded`; the first non-null
/// candidate wins. Non-negative integers and numeric strings are accepted.
pub fn rows_loaded(data: &Value) -> Option<u64> {
    let candidate = [
        data.get("rows_loaded"),
        data.get("loaded"),
        data.get("metrics").and_then(|m| m.get("rows_loaded")),
    ]
    .into_iter()
    .flatten()
    .find(|v| !v.is_null())?;

    match candidate {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BasicCredential;
    use crate::error::AgentError;
    use axum::{routing::post, Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn service(agent_url: String, ingest_url: Option<String>) -> AgentService {
        let credential = BasicCredential::new("user", "pass");
        let config = GatewayConfig {
            agent_url,
            ingest_url,
            credential: credential.clone(),
            timeout: Duration::from_secs(2),
            bind_addr: "127.0.0.1:0".to_string(),
        };
        AgentService::new(config, UpstreamClient::new(&credential, Duration::from_secs(2)).unwrap())
    }

    #[tokio::test]
    async fn ask_forwards_trimmed_question_and_validates() {
        let app = Router::new().route(
            "/agent",
            post(|Json(body): Json<Value>| async move {
                Json(json!({
                    "question": body["question"],
                    "cac": { "current": "29.986837" }
                }))
            }),
        );
        let base = spawn(app).await;
        let svc = service(format!("{}/agent", base), None);

        let r = svc.ask("  CAC for June?  ").await.unwrap();
        assert_eq!(r.question.as_deref(), Some("CAC for June?"));
        assert_eq!(r.cac.unwrap().previous, "");
    }

    #[tokio::test]
    async fn blank_question_never_reaches_upstream() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/agent",
            post(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(json!({}))
                }
            }),
        );
        let base = spawn(app).await;
        let svc = service(format!("{}/agent", base), None);

        let err = svc.ask("   ").await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn schema_mismatch_is_reported() {
        let app = Router::new().route(
            "/agent",
            post(|| async { Json(json!({ "roas": { "current": 3.3 } })) }),
        );
        let base = spawn(app).await;
        let svc = service(format!("{}/agent", base), None);
        let err = svc.ask("roas?").await.unwrap_err();
        assert!(matches!(err, AgentError::SchemaViolation(_)));
    }

    #[tokio::test]
    async fn ingest_requires_configured_url() {
        let svc = service("http://127.0.0.1:9/agent".to_string(), None);
        let err = svc.ingest().await.unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));
    }

    #[tokio::test]
    async fn ingest_returns_opaque_data_and_row_count() {
        let app = Router::new().route(
            "/ingest",
            post(|| async { Json(json!({ "metrics": { "rows_loaded": 1200 }, "status": "done" })) }),
        );
        let base = spawn(app).await;
        let svc = service("http://127.0.0.1:9/agent".to_string(), Some(format!("{}/ingest", base)));
        let out = svc.ingest().await.unwrap();
        assert_eq!(out.rows_loaded, Some(1200));
        assert_eq!(out.data["status"], "done");
    }

    #[test]
    fn rows_loaded_reads_defensively() {
        assert_eq!(rows_loaded(&json!({ "rows_loaded": 10, "loaded": 3 })), Some(10));
        assert_eq!(rows_loaded(&json!({ "rows_loaded": null, "loaded": 3 })), Some(3));
        assert_eq!(rows_loaded(&json!({ "loaded": "77" })), Some(77));
        assert_eq!(rows_loaded(&json!({ "metrics": { "rows_loaded": 5.0 } })), Some(5));
        assert_eq!(rows_loaded(&json!({ "rows_loaded": "many" })), None);
        assert_eq!(rows_loaded(&json!({ "rows_loaded": -1 })), None);
        assert_eq!(rows_loaded(&json!("plain text")), None);
        assert_eq!(rows_loaded(&json!([1, 2])), None);
    }
}
