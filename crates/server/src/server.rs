//! Server initialization and routing
//!
//! This module handles the Axum server setup including:
//! - Router configuration with each route behind its admission gate
//! - Middleware stack (logging, compression, timeouts)
//! - Graceful shutdown handling

use crate::config::ServerConfig;
use crate::middleware::{admission_gate, log_requests, request_id, RouteGates};
use crate::routes::{auth, data, health, not_found, upload, users};
use crate::state::ServerState;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the Axum router with all routes and middleware
///
/// Routes are divided into:
/// - Public: /health, /metrics, /upload/mock/{id}
/// - Rate limited: POST /auth/login, POST /users
/// - API key: GET /users
/// - Token: GET/POST /data, POST /upload
///
/// Middleware stack (outermost first):
/// 1. Tracing
/// 2. Request ID
/// 3. Request logging
/// 4. CORS, compression, timeout
/// 5. Admission gate (per route)
pub fn build_router(state: Arc<ServerState>) -> Router {
    let gates = RouteGates::from_state(&state);

    let cors = if state.config.enable_cors {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    let rate_limited = || from_fn_with_state(Arc::clone(&gates.rate_limited), admission_gate);
    let api_key = || from_fn_with_state(Arc::clone(&gates.api_key), admission_gate);
    let token = || from_fn_with_state(Arc::clone(&gates.token), admission_gate);

    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        .route("/upload/mock/{id}", get(upload::get_object));

    let gated_routes = Router::new()
        .route("/auth/login", post(auth::login).layer(rate_limited()))
        .route(
            "/users",
            post(users::register)
                .layer(rate_limited())
                .merge(get(users::list_users).layer(api_key())),
        )
        .route(
            "/data",
            get(data::extract_from_query)
                .post(data::extract_from_body)
                .layer(token()),
        )
        .route("/upload", post(upload::upload_file).layer(token()))
        .layer(DefaultBodyLimit::max(state.config.max_body_size()));

    Router::new()
        .merge(public_routes)
        .merge(gated_routes)
        .fallback(not_found)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.config.timeout(),
        ))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(from_fn(log_requests))
        .layer(from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gatekeep HTTP server
///
/// Initializes logging and metrics, builds shared state and listens until
/// SIGTERM or Ctrl+C. The rate limiter's sweep is stopped before returning.
///
/// # Example
///
/// ```rust,no_run
/// use server::ServerConfig;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ServerConfig::load()?;
///     server::start_server(config).await?;
///     Ok(())
/// }
/// ```
pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json()
        .init();

    let mut state = ServerState::new(config.clone())?;
    if config.metrics_enabled {
        let handle = PrometheusBuilder::new().install_recorder()?;
        state = state.with_metrics(handle);
    }
    let state = Arc::new(state);

    let app = build_router(Arc::clone(&state));
    let addr: SocketAddr = config.socket_addr()?;

    tracing::info!(
        "Starting gatekeep server on {} with {} API keys",
        addr,
        config.admission.api_keys.len()
    );
    tracing::info!(
        "Timeout: {}s, Max body: {}MB",
        config.timeout_secs,
        config.max_body_size_mb
    );
    tracing::info!(
        "Rate limit: {} requests per {}s window",
        config.admission.rate_limit.max_requests,
        config.admission.rate_limit.window_secs
    );
    tracing::info!(
        "CORS: {}, Metrics: {}, OCR: {}",
        config.enable_cors,
        config.metrics_enabled,
        config.ocr_endpoint.as_deref().unwrap_or("not configured")
    );

    let reloader = tokio::spawn(reload_on_hangup(Arc::clone(&state)));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    reloader.abort();
    state.shutdown().await;
    served?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Re-read the configuration on SIGHUP and swap in its API keys.
///
/// A load failure keeps the current keys.
#[cfg(unix)]
async fn reload_on_hangup(state: Arc<ServerState>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(err) => {
            tracing::error!(error = %err, "failed to install SIGHUP handler");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        tracing::info!("Received SIGHUP, reloading API keys");
        match ServerConfig::load() {
            Ok(fresh) => {
                state.reload_api_keys(fresh.admission.api_keys);
            }
            Err(err) => tracing::error!(error = %err, "config reload failed; keeping current API keys"),
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_state: Arc<ServerState>) {}

/// Shutdown signal handler
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
