use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::gateway::Gateway;
use crate::handlers;
use crate::ratelimit::{RateLimiter, spawn_sweep_task};
use crate::upstream::{API_KEY_ENV, UpstreamAuth, UpstreamClient, UpstreamError};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub upstream: Arc<UpstreamClient>,
    pub max_body_bytes: usize,
    /// Deadline for one API request, fallback hop included.
    pub request_timeout: Duration,
}

pub fn build_app(state: AppState) -> Router {
    let api = Router::new()
        .route("/generate", post(handlers::generate))
        .route("/models", get(handlers::list_models))
        .with_state(state);

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

/// Wire the limiter, the upstream client and its fallback into one state.
pub fn build_state(config: &Config, auth: UpstreamAuth) -> Result<AppState, UpstreamError> {
    let upstream = Arc::new(UpstreamClient::new(config.upstream.clone(), auth)?);
    let gateway = Gateway::new(
        Arc::new(RateLimiter::new()),
        config.rate_limit.policy(),
        upstream.clone(),
        Arc::new(upstream.fallback()),
    );

    Ok(AppState {
        gateway: Arc::new(gateway),
        upstream,
        max_body_bytes: config.server.max_body_bytes,
        request_timeout: Duration::from_secs(config.server.request_timeout_seconds),
    })
}

/// Serve until ctrl-c.
pub async fn run(config: Config, auth: UpstreamAuth) -> anyhow::Result<()> {
    if !auth.is_configured() {
        warn!(
            env = API_KEY_ENV,
            "No upstream credential configured, calls will be unauthenticated"
        );
    }

    let state = build_state(&config, auth).context("failed to build upstream client")?;
    let sweeper = spawn_sweep_task(
        state.gateway.limiter().clone(),
        Duration::from_secs(config.rate_limit.sweep_interval_seconds),
    );

    let app = build_app(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(
        %addr,
        max_requests = config.rate_limit.max_requests,
        window_ms = config.rate_limit.window_ms,
        "Gateway listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    sweeper.abort();
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
