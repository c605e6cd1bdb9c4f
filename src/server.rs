use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::ServerConfig;
use crate::handlers;
use crate::session::{SessionRegistry, TurnRunner};
use crate::ws;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub hub: ws::ConnectionHub,
    pub turns: TurnRunner,
}

// ============================================================================
// Server Setup
// ============================================================================

pub fn build_app(state: AppState, server: &ServerConfig) -> Router {
    // WebSocket route - no request timeout, connections are long-lived
    let ws_routes = Router::new()
        .route("/ws/chat/{session_id}", get(ws::ws_chat))
        .with_state(state.clone());

    // Regular API routes - with request timeout
    let api_routes = Router::new()
        .route(
            "/sessions",
            get(handlers::v1::list_sessions).post(handlers::v1::create_session),
        )
        .route(
            "/sessions/{session_id}",
            get(handlers::v1::get_session).delete(handlers::v1::close_session),
        )
        .route(
            "/sessions/{session_id}/status",
            get(handlers::v1::get_session_status),
        )
        .route(
            "/sessions/{session_id}/chat",
            post(handlers::v1::chat_info),
        )
        .with_state(state.clone())
        .layer(TimeoutLayer::new(Duration::from_secs(
            server.request_timeout_seconds,
        )))
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024)) // 2 MB
        .layer(ConcurrencyLimitLayer::new(server.max_connections));

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .with_state(state)
        .nest("/api/v1", api_routes)
        .merge(ws_routes)
        .layer(cors_layer(server))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = server
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
}
