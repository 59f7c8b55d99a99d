use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sudovision::api::routes::{router, ApiState};
use sudovision::api::{HealthState, LatencyStats};
use sudovision::config::Config;
use sudovision::error::Result;
use sudovision::query::{cancel_pair, CancelHandle, QueryClient};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let client = QueryClient::from_config(&cfg)?;
    info!(
        "Dune client ready at {} (poll every {}ms, max {} polls, deadline {})",
        cfg.api_url,
        cfg.poll.interval.as_millis(),
        cfg.poll.max_attempts,
        cfg.poll
            .timeout
            .map(|t| format!("{}s", t.as_secs()))
            .unwrap_or_else(|| "none".to_string()),
    );
    info!(
        owner_query = cfg.owner_query_id,
        collection_query = cfg.collection_query_id,
        earnings_query = cfg.earnings_query_id,
        variant = %cfg.default_variant,
        "Query ids configured",
    );

    let (cancel_handle, cancel) = cancel_pair();
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);

    let state = ApiState {
        client,
        cfg: Arc::new(cfg),
        health: Arc::new(HealthState::new()),
        latency: Arc::new(LatencyStats::new()),
        cancel,
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_handle))
        .await?;

    info!("HTTP API stopped");
    Ok(())
}

/// Resolves on ctrl-c after cancelling every in-flight execution wait.
async fn shutdown_signal(cancel: CancelHandle) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, cancelling in-flight executions");
    cancel.cancel();
}
