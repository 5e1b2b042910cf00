//! Load Probe — fires concurrent KPI questions at the gateway's `/agent` route.
//! Reports success rate, mean latency and how failures split between 400 and 502.
//! Run with gateway up: cargo run --bin load_probe
//! Tunables: KPI_GATEWAY_URL, PROBE_CLIENTS, PROBE_REQUESTS_PER_CLIENT.

use reqwest::Client;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_CLIENTS: usize = 10;
const DEFAULT_REQUESTS_PER_CLIENT: usize = 5;

const QUESTIONS: &[&str] = &[
    "What was our CAC last month?",
    "How did ROAS change compared to the previous period?",
    "Compare CAC and ROAS for June.",
    "Is customer acquisition getting more expensive?",
    "Show me ROAS for the last 30 days.",
    "Did the campaign improve return on ad spend?",
    "What is the CAC trend this quarter?",
    "Give me both KPIs for the current window.",
];

#[derive(Default)]
struct Tally {
    success: AtomicU32,
    rejected: AtomicU32,
    upstream_failed: AtomicU32,
    transport_failed: AtomicU32,
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let base_url = std::env::var("KPI_GATEWAY_URL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());
    let base_url = base_url.trim_end_matches('/').to_string();
    let clients = env_usize("PROBE_CLIENTS", DEFAULT_CLIENTS);
    let per_client = env_usize("PROBE_REQUESTS_PER_CLIENT", DEFAULT_REQUESTS_PER_CLIENT);

    println!(
        "[LOAD PROBE] Starting: {} clients x {} requests = {} total",
        clients,
        per_client,
        clients * per_client
    );
    println!("[LOAD PROBE] Target: {}/agent (ensure gateway is running)", base_url);

    let tally = Arc::new(Tally::default());
    let latencies: Arc<RwLock<Vec<u64>>> = Arc::new(RwLock::new(Vec::new()));
    let client = Client::new();

    let mut handles = Vec::new();
    for client_id in 0..clients {
        let client = client.clone();
        let tally = Arc::clone(&tally);
        let latencies = Arc::clone(&latencies);
        let url = format!("{}/agent", base_url);

        let h = tokio::spawn(async move {
            for r in 0..per_client {
                let question = QUESTIONS[(client_id + r) % QUESTIONS.len()];

                let start = Instant::now();
                let res = client
                    .post(&url)
                    .json(&json!({ "question": question }))
                    .send()
                    .await;
                let elapsed_ms = start.elapsed().as_millis() as u64;

                match res {
                    Ok(resp) if resp.status().is_success() => {
                        tally.success.fetch_add(1, Ordering::Relaxed);
                        latencies.write().await.push(elapsed_ms);
                    }
                    Ok(resp) if resp.status().is_client_error() => {
                        tally.rejected.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(_) => {
                        tally.upstream_failed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => {
                        tally.transport_failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        });
        handles.push(h);
    }

    for h in handles {
        let _ = h.await;
    }

    let s = tally.success.load(Ordering::Relaxed);
    let rejected = tally.rejected.load(Ordering::Relaxed);
    let upstream = tally.upstream_failed.load(Ordering::Relaxed);
    let transport = tally.transport_failed.load(Ordering::Relaxed);
    let total = s + rejected + upstream + transport;
    let success_rate = if total > 0 { (s as f64 / total as f64) * 100.0 } else { 0.0 };
    let latencies_guard = latencies.read().await;
    let avg_latency_ms = if latencies_guard.is_empty() {
        0.0
    } else {
        latencies_guard.iter().sum::<u64>() as f64 / latencies_guard.len() as f64
    };

    println!(
        "[LOAD PROBE] Success rate: {:.1}% | Mean latency: {:.0}ms",
        success_rate, avg_latency_ms
    );
    println!(
        "[LOAD PROBE] Total: {} | Success: {} | 4xx: {} | 5xx: {} | Unreachable: {}",
        total, s, rejected, upstream, transport
    );
}
