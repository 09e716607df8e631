//! Document relay service
//!
//! Single-binary Rust service that:
//! 1. Keeps one OAuth access token per provider fresh (Creator, DropStore)
//! 2. Accepts relay requests over HTTP
//! 3. Streams each document through a local staging file
//! 4. Uploads it to a Creator record field or to DropStore

mod config;
mod error;
mod guard;
mod handlers;
mod metrics;
mod pipeline;
mod remote;
mod staging;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;
use provider::ProviderKind;
use relay_auth::OAuthRefresher;
use token_cache::{TokenCache, spawn_refresh_task};

use crate::config::Config;
use crate::guard::RateLimiter;
use crate::handlers::{RelayState, UploadFileBody, UploadToDropStoreBody};
use crate::metrics::ServiceMetrics;
use crate::pipeline::FileRelayPipeline;
use crate::remote::{RemoteClients, RemoteEndpoints};
use crate::staging::StagingStore;

/// How long in-flight relays get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    relay: RelayState,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
}

/// Inbound protections applied around the routes.
struct Guards {
    cors: CorsLayer,
    allowed_origin: Option<HeaderValue>,
    limiter: Arc<RateLimiter>,
    max_connections: usize,
}

impl Guards {
    fn from_config(config: &Config) -> Result<Self> {
        let allowed_origin = config.server.allowed_origin.as_deref();
        let cors = guard::cors_layer(allowed_origin).context("invalid allowed_origin")?;
        let allowed_origin = allowed_origin
            .map(HeaderValue::from_str)
            .transpose()
            .context("invalid allowed_origin")?;
        Ok(Self {
            cors,
            allowed_origin,
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit.max_requests,
                Duration::from_secs(config.rate_limit.window_secs),
            )),
            max_connections: config.server.max_connections,
        })
    }
}

/// Build the axum router with all routes and shared state.
///
/// The rate limit covers the relay routes only; liveness, health and metrics
/// probes are never throttled.
fn build_router(state: AppState, guards: Guards) -> Router {
    let relay_routes = Router::new()
        .route("/upload-file", post(upload_file_handler))
        .route("/upload-to-dropbox", post(upload_to_drop_store_handler))
        .route_layer(middleware::from_fn_with_state(
            guards.limiter,
            guard::rate_limit,
        ));

    let mut app = Router::new()
        .route("/ping", get(ping_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(relay_routes);

    if let Some(origin) = guards.allowed_origin {
        app = app.layer(middleware::from_fn_with_state(origin, guard::enforce_origin));
    }

    app.layer(guards.cors)
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            guards.max_connections,
        ))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting doc-relay");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        staging_dir = %config.relay.staging_dir.display(),
        timeout_secs = config.relay.timeout_secs,
        allowed_origin = config.server.allowed_origin.as_deref().unwrap_or("*"),
        "configuration loaded"
    );

    let staging = StagingStore::new(&config.relay.staging_dir);
    staging.ensure_dir().await.with_context(|| {
        format!(
            "failed to create staging directory {}",
            staging.dir().display()
        )
    })?;

    let timeout = config.relay.timeout();
    let client = reqwest::Client::builder()
        .connect_timeout(timeout)
        .build()
        .context("failed to build HTTP client")?;

    let mut refresher = OAuthRefresher::new(client.clone(), timeout);
    for provider in ProviderKind::ALL {
        refresher = refresher.with_provider(provider, config.credentials(provider)?);
    }
    let tokens = Arc::new(
        TokenCache::new(Arc::new(refresher))
            .with_skew(Duration::from_secs(config.tokens.skew_secs)),
    );

    if config.tokens.background_refresh_secs > 0 {
        spawn_refresh_task(
            tokens.clone(),
            Duration::from_secs(config.tokens.background_refresh_secs),
            Duration::from_secs(config.tokens.refresh_threshold_secs),
        );
        info!(
            interval_secs = config.tokens.background_refresh_secs,
            threshold_secs = config.tokens.refresh_threshold_secs,
            "background token refresh enabled"
        );
    }

    let remote = RemoteClients::new(
        client,
        timeout,
        RemoteEndpoints {
            creator_download_url: config.creator.download_url.clone(),
            creator_upload_url: config.creator.upload_url.clone(),
            drop_store_upload_url: config.drop_store.upload_url.clone(),
        },
    );
    let pipeline = Arc::new(FileRelayPipeline::new(tokens, staging, remote));

    let metrics = ServiceMetrics::new();
    let app_state = AppState {
        relay: RelayState {
            pipeline,
            requests_total: metrics.requests_total.clone(),
            errors_total: metrics.errors_total.clone(),
        },
        metrics,
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, Guards::from_config(&config)?);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: notify the server to drain, then race the drain against
    // the timeout.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Liveness probe.
async fn ping_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Health endpoint: per-provider token state, uptime and relay counters.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.metrics.started_at.elapsed().as_secs();
    let requests = state.metrics.requests_total.load(Ordering::Relaxed);
    let errors = state.metrics.errors_total.load(Ordering::Relaxed);

    Json(serde_json::json!({
        "status": "healthy",
        "uptime_seconds": uptime,
        "requests_served": requests,
        "errors_total": errors,
        "tokens": state.relay.pipeline.tokens().health().await,
    }))
}

/// Prometheus metrics endpoint — returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

async fn upload_file_handler(
    State(state): State<AppState>,
    body: Result<Json<UploadFileBody>, JsonRejection>,
) -> Response {
    handlers::upload_file(&state.relay, body).await
}

async fn upload_to_drop_store_handler(
    State(state): State<AppState>,
    body: Result<Json<UploadToDropStoreBody>, JsonRejection>,
) -> Response {
    handlers::upload_to_drop_store(&state.relay, body).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
