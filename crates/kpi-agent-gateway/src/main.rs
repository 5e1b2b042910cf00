//! KPI Agent Gateway — bound to 127.0.0.1:8000 unless GATEWAY_BIND says otherwise.
//! Forwards KPI questions and ingestion triggers to the workflow engine.

use std::net::SocketAddr;

use kpi_agent_core::{AgentService, GatewayConfig};
use kpi_agent_gateway::{router, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("[GATEWAY] startup failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::from_env()?;
    let bind_addr = config.bind_addr.clone();
    tracing::info!(
        timeout_ms = config.timeout.as_millis() as u64,
        ingest_configured = config.ingest_url.is_some(),
        "[GATEWAY] configuration loaded"
    );

    let app = router(AppState::new(AgentService::from_config(config)?));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("[GATEWAY] listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
