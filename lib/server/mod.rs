pub mod monitoring;
use crate::state::AppState;
use prometheus_client::encoding::text::encode;

use axum::{extract::State, http::StatusCode, routing::get, Router};
use monitoring::{ScannerMetrics, SCANNER_METRICS};
use std::net::SocketAddr;
use std::sync::Arc;

async fn health_handler() -> String {
    "Healthy".to_string()
}

async fn expose_metrics(state: State<Arc<AppState>>) -> (StatusCode, String) {
    let mut buffer = String::new();
    let registry = state.registry.read().await;
    match encode(&mut buffer, &registry) {
        Ok(()) => (StatusCode::OK, buffer),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        ),
    }
}

/// Registers the process metrics once and returns the shared handle.
pub async fn register_metrics(state: &AppState) -> ScannerMetrics {
    let mut registry = state.registry.write().await;
    SCANNER_METRICS
        .get_or_init(|| async {
            monitoring::register_build_info_metric(&mut registry, "signer");
            ScannerMetrics::register(&mut registry, "block_scanner")
        })
        .await
        .clone()
}

/// Starts the health/metrics HTTP server on the supplied socket address.
pub async fn setup_server_with_addr(
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<tokio::task::JoinHandle<()>, std::io::Error> {
    let shutdown_token = state.shutdown_token.clone();
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(expose_metrics))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        event = "metrics_server_listening",
        addr = %listener.local_addr()?,
        "serving /health and /metrics"
    );
    let server_handle = tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_token.cancelled().await;
            })
            .await;
        if let Err(err) = served {
            tracing::error!(
                event = "metrics_server_failed",
                error = %err,
                "metrics server stopped"
            );
        }
    });

    Ok(server_handle)
}
