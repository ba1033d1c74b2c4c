use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::config::ConnectionConfig;
use crate::connection::ConnectionRegistry;
use crate::exchange::Orchestrator;
use crate::handlers;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: ConnectionRegistry,
    pub connection: ConnectionConfig,
    pub api_token: Option<String>,
    pub keep_alive_interval_seconds: u64,
    pub max_connections: usize,
}

pub fn build_app(state: AppState, request_timeout_seconds: u64) -> Router {
    let max_connections = state.max_connections;
    let body_limit = state.connection.max_message_bytes;

    // Streaming routes live as long as their exchange or socket; no timeout.
    let api_v1 = Router::new()
        .route("/stream/{mode}", post(handlers::v1::stream_exchange))
        .route("/ws", get(handlers::v1::connect))
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            handlers::api_auth::require_api_token,
        ))
        .layer(ConcurrencyLimitLayer::new(max_connections));

    let health = Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_seconds),
        ));

    Router::new().merge(health).nest("/api/v1", api_v1)
}
