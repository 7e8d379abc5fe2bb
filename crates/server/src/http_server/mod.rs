use std::io;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tower_http::trace::{DefaultOnFailure, DefaultOnResponse};
use tower_http::LatencyUnit;

mod config;
mod handlers;
mod health;
mod metrics;
pub mod tuf;

pub use config::{CacheControlConfig, Config, DEFAULT_CONSISTENT_MAX_AGE, DEFAULT_CURRENT_MAX_AGE};

use crate::ServiceState;

const TUF_PREFIX: &str = "/v2";
const STATUS_PREFIX: &str = "/_status";
const METRICS_PATH: &str = "/metrics";

/// Maximum batch upload size in bytes (50 MB)
pub const MAX_UPLOAD_SIZE_BYTES: usize = 50 * 1024 * 1024;

/// Build the full service router: TUF routes, metrics, status, and the 404 fallback
pub fn router(state: ServiceState, log_level: tracing::Level) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .on_response(
            DefaultOnResponse::new()
                .include_headers(false)
                .level(log_level)
                .latency_unit(LatencyUnit::Micros),
        )
        .on_failure(DefaultOnFailure::new().latency_unit(LatencyUnit::Micros));

    Router::new()
        .nest(TUF_PREFIX, tuf::router(state.clone()))
        .nest(STATUS_PREFIX, health::router(state.clone()))
        .route(METRICS_PATH, get(metrics::handler))
        .fallback(handlers::not_found_handler)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE_BYTES))
        .with_state(state)
        .layer(trace_layer)
}

/// Bind the listen address, surfacing failures (bad address, port in use,
///  permission denied) to the caller.
pub async fn bind(listen_addr: &str) -> Result<TcpListener, HttpServerError> {
    TcpListener::bind(listen_addr)
        .await
        .map_err(|source| HttpServerError::Bind {
            addr: listen_addr.to_string(),
            source,
        })
}

/// Serve on an already bound listener until the shutdown signal fires
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "notary server listening");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

/// Bind and serve in one step
pub async fn run(
    config: Config,
    state: ServiceState,
    shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let listener = bind(&config.listen_addr).await?;
    serve(listener, router(state, config.log_level), shutdown_rx).await
}

#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("an error occurred running the HTTP server: {0}")]
    ServingFailed(#[from] io::Error),
}
