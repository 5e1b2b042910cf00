//! KPI Agent Gateway — HTTP surface over the workflow engine.
//! `POST /agent` answers KPI questions, `POST /ingest` triggers the ingestion run.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use kpi_agent_core::{validate_question, AgentError, AgentResponse, AgentService, ErrorKind};
use serde_json::{json, Value};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AgentService>,
}

impl AppState {
    pub fn new(service: AgentService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/agent", post(agent_handler))
        .route("/ingest", post(ingest_handler))
        .with_state(state)
        .layer(axum::middleware::from_fn(log_traffic))
}

/// `AgentError` rendered as `{ "error": message }` with its HTTP class.
#[derive(Debug)]
pub struct ApiError(pub AgentError);

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
        if self.0.kind() != ErrorKind::Validation {
            tracing::error!(kind = ?self.0.kind(), "[GATEWAY] {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn log_traffic(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        %method,
        %path,
        %peer,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "[GATEWAY] request served"
    );
    response
}

async fn health() -> &'static str {
    "OK"
}

/// POST /agent: validate `{question}`, forward it, return the normalized answer.
async fn agent_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<AgentResponse>, ApiError> {
    // A body that is not JSON is treated the same as one without a question.
    let payload = serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null);
    let question = validate_question(&payload)?;
    let response = state.service.ask(&question).await?;
    Ok(Json(response))
}

/// POST /ingest: run the ingestion workflow to completion.
async fn ingest_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let outcome = state.service.ingest().await?;
    Ok(Json(json!({
        "ok": true,
        "data": outcome.data,
        "rows_loaded": outcome.rows_loaded,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use kpi_agent_core::{BasicCredential, GatewayConfig, QUESTION_REQUIRED};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    fn count(hits: Arc<AtomicUsize>) {
        hits.fetch_add(1, Ordering::SeqCst);
    }

    /// In-process stand-in for the workflow engine. Counts every hit.
    async fn fake_engine(hits: Arc<AtomicUsize>) -> String {
        let (h1, h2, h3, h4, h5) = (
            Arc::clone(&hits),
            Arc::clone(&hits),
            Arc::clone(&hits),
            Arc::clone(&hits),
            Arc::clone(&hits),
        );
        let app = Router::new()
            .route(
                "/agent",
                post(move |Json(body): Json<Value>| async move {
                    count(h1);
                    Json(json!({
                        "question": body["question"],
                        "window": { "start": "2025-06-01", "end": "2025-06-30", "tz": "UTC" },
                        "cac": { "current": "29.986837" },
                        "trace_id": "abc"
                    }))
                }),
            )
            .route(
                "/broken",
                post(move || async move {
                    count(h2);
                    (StatusCode::INTERNAL_SERVER_ERROR, "workflow exploded")
                }),
            )
            .route(
                "/mangled",
                post(move || async move {
                    count(h3);
                    Json(json!({ "roas": { "current": 3.33 } }))
                }),
            )
            .route(
                "/slow",
                post(move || async move {
                    count(h4);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Json(json!({}))
                }),
            )
            .route(
                "/ingest",
                post(move || async move {
                    count(h5);
                    Json(json!({ "loaded": "1200", "status": "done" }))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn app(agent_url: String, ingest_url: Option<String>, timeout: Duration) -> Router {
        let config = GatewayConfig {
            agent_url,
            ingest_url,
            credential: BasicCredential::new("kpi-bot", "secret"),
            timeout,
            bind_addr: "127.0.0.1:0".to_string(),
        };
        router(AppState::new(AgentService::from_config(config).unwrap()))
    }

    async fn post_raw(app: Router, uri: &str, body: &str) -> (StatusCode, Value) {
        let res = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = app("http://127.0.0.1:9/agent".into(), None, Duration::from_secs(1));
        let res = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"OK");
    }

    #[tokio::test]
    async fn bad_questions_are_rejected_before_upstream() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = fake_engine(Arc::clone(&hits)).await;

        for body in [r#"{}"#, r#"{"question":""}"#, r#"{"question":"   "}"#, r#"{"question":42}"#, "not json"] {
            let app = app(format!("{}/agent", base), None, Duration::from_secs(2));
            let (status, json) = post_raw(app, "/agent", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {body}");
            assert_eq!(json["error"], QUESTION_REQUIRED);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn agent_returns_normalized_response() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = fake_engine(Arc::clone(&hits)).await;
        let app = app(format!("{}/agent", base), None, Duration::from_secs(2));

        let (status, json) = post_raw(app, "/agent", r#"{"question":"  CAC in June?  "}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json,
            json!({
                "question": "CAC in June?",
                "window": { "start": "2025-06-01", "end": "2025-06-30" },
                "cac": { "current": "29.986837", "previous": "", "delta_pct": "" }
            })
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn upstream_failures_map_to_bad_gateway() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = fake_engine(Arc::clone(&hits)).await;

        let (status, json) = post_raw(
            app(format!("{}/broken", base), None, Duration::from_secs(2)),
            "/agent",
            r#"{"question":"cac?"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["error"], "workflow exploded");

        let (status, json) = post_raw(
            app(format!("{}/mangled", base), None, Duration::from_secs(2)),
            "/agent",
            r#"{"question":"roas?"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(json["error"].as_str().unwrap().contains("schema"));
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = fake_engine(Arc::clone(&hits)).await;
        let app = app(format!("{}/slow", base), None, Duration::from_millis(200));

        let started = Instant::now();
        let (status, json) = post_raw(app, "/agent", r#"{"question":"cac?"}"#).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(json["error"].as_str().unwrap().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn ingest_without_url_is_bad_gateway() {
        let app = app("http://127.0.0.1:9/agent".into(), None, Duration::from_secs(1));
        let (status, json) = post_raw(app, "/ingest", "").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(json["error"].as_str().unwrap().contains("WORKFLOW_INGEST_URL"));
    }

    #[tokio::test]
    async fn ingest_reports_rows_loaded() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = fake_engine(Arc::clone(&hits)).await;
        let app = app(
            "http://127.0.0.1:9/agent".into(),
            Some(format!("{}/ingest", base)),
            Duration::from_secs(2),
        );
        let (status, json) = post_raw(app, "/ingest", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);
        assert_eq!(json["rows_loaded"], 1200);
        assert_eq!(json["data"]["status"], "done");
    }
}
