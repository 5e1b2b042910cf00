//! KPI Chat — terminal console for a running gateway.
//! Each stdin line is a question; `/ingest` triggers the ingestion run; `/quit` exits.
//! Questions run concurrently and are printed as they resolve.
//! Run with gateway up: cargo run --bin kpi-chat

use async_trait::async_trait;
use kpi_agent_core::{
    conversation::{AgentMessage, AgentStatus, NO_METRICS_TEXT},
    format_delta, format_value, AgentBackend, AgentError, AgentResponse, AgentResult,
    ConversationSession, MessageId, QuestionEnvelope,
};
use reqwest::Client;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:8000";

/// Talks to the gateway's `/agent` route and re-checks what comes back.
struct GatewayBackend {
    client: Client,
    base_url: String,
}

impl GatewayBackend {
    async fn post(&self, path: &str, body: Option<&QuestionEnvelope>) -> AgentResult<Value> {
        let mut req = self.client.post(format!("{}{}", self.base_url, path));
        if let Some(body) = body {
            req = req.json(body);
        }
        let res = req.send().await?;
        let status = res.status();
        let payload: Value = res.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let message = payload
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(AgentError::UpstreamStatus {
                status: status.as_u16(),
                message,
            });
        }
        Ok(payload)
    }

    async fn ingest(&self) -> AgentResult<Option<u64>> {
        let payload = self.post("/ingest", None).await?;
        Ok(payload.get("rows_loaded").and_then(Value::as_u64))
    }
}

#[async_trait]
impl AgentBackend for GatewayBackend {
    async fn query(&self, question: &str) -> AgentResult<AgentResponse> {
        let envelope = QuestionEnvelope {
            question: question.to_string(),
        };
        let payload = self.post("/agent", Some(&envelope)).await?;
        AgentResponse::validate(&payload)
    }
}

fn render(question: &str, msg: &AgentMessage) -> String {
    let mut out = format!("\n> {}\n{}\n", question, msg.text);
    if msg.status != AgentStatus::Completed {
        return out;
    }
    match &msg.chart_data {
        None => out.push_str(&format!("  {}\n", NO_METRICS_TEXT)),
        Some(chart) => {
            if let Some(meta) = &msg.meta {
                out.push_str(&format!(
                    "  Window: {} → {}\n",
                    meta.start.as_deref().unwrap_or("—"),
                    meta.end.as_deref().unwrap_or("—")
                ));
            }
            for row in &chart.rows {
                out.push_str(&format!(
                    "  {:<5} previous {:>12}  current {:>12}  delta {}\n",
                    row.label.as_str(),
                    format_value(row.previous),
                    format_value(row.current),
                    format_delta(row.delta_pct)
                ));
            }
        }
    }
    out
}

async fn ask_and_print(
    session: ConversationSession<GatewayBackend>,
    question: String,
) -> Option<MessageId> {
    match session.ask(&question).await {
        Ok(id) => {
            if let Some(msg) = session.agent(id).await {
                if let Some(err) = &msg.error {
                    tracing::debug!(%id, "[CHAT] failure detail: {}", err);
                }
                print!("{}", render(&question, &msg));
            }
            Some(id)
        }
        Err(e) => {
            println!("{}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let base_url = std::env::var("KPI_GATEWAY_URL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());
    let backend = std::sync::Arc::new(GatewayBackend {
        client: Client::new(),
        base_url: base_url.trim_end_matches('/').to_string(),
    });
    let session = ConversationSession::with_backend(std::sync::Arc::clone(&backend));

    println!("[CHAT] Connected to {}. Ask about CAC or ROAS; /ingest loads data, /quit exits.", base_url);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("[CHAT] stdin: {}", e);
                break;
            }
        };
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/ingest" => {
                let backend = std::sync::Arc::clone(&backend);
                in_flight.spawn(async move {
                    println!("[CHAT] Ingestion started…");
                    match backend.ingest().await {
                        Ok(rows) => println!(
                            "[CHAT] Ingestion finished. Rows loaded: {}",
                            rows.map(|n| n.to_string()).unwrap_or_else(|| "—".to_string())
                        ),
                        Err(e) => println!("[CHAT] Ingestion failed: {}", e),
                    }
                    None
                });
            }
            _ => {
                in_flight.spawn(ask_and_print(session.clone(), line));
            }
        }
    }

    while in_flight.join_next().await.is_some() {}

    let transcript = session.snapshot().await;
    tracing::info!(messages = transcript.len(), "[CHAT] session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpi_agent_core::{
        conversation::{FAILURE_TEXT, PENDING_TEXT},
        Conversation,
    };
    use serde_json::json;

    fn resolved(outcome: AgentResult<AgentResponse>) -> AgentMessage {
        let mut conv = Conversation::new();
        let s = conv.submit("kpis").unwrap();
        conv.resolve(s.agent_id, outcome).unwrap();
        conv.agent(s.agent_id).cloned().unwrap()
    }

    #[test]
    fn renders_rows_window_and_deltas() {
        let response = AgentResponse::validate(&json!({
            "window": { "start": "2025-06-01", "end": "2025-06-30" },
            "cac": { "current": "29.986837", "previous": "32.329272", "delta_pct": "-0.072456" },
            "roas": { "current": "3.334797", "previous": "3.093172", "delta_pct": "0.078115" }
        }))
        .unwrap();
        let out = render("kpis", &resolved(Ok(response)));
        assert!(out.contains("Window: 2025-06-01 → 2025-06-30"));
        assert!(out.contains("CAC"));
        assert!(out.contains("-7.25%"));
        assert!(out.contains("+7.81%"));
    }

    #[test]
    fn renders_no_metrics_fallback() {
        let out = render("kpis", &resolved(Ok(AgentResponse::default())));
        assert!(out.contains(NO_METRICS_TEXT));
    }

    #[test]
    fn pending_text_is_printed_once() {
        let mut conv = Conversation::new();
        let s = conv.submit("kpis").unwrap();
        let out = render("kpis", conv.agent(s.agent_id).unwrap());
        assert_eq!(out.matches(PENDING_TEXT).count(), 1);
        assert!(!out.contains(NO_METRICS_TEXT));
    }

    #[test]
    fn renders_failure_without_rows() {
        let out = render("kpis", &resolved(Err(AgentError::Timeout { after_ms: 10_000 })));
        assert!(out.contains(FAILURE_TEXT));
        assert!(!out.contains("delta"));
    }
}
