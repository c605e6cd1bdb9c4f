//! Session management HTTP handlers.
//!
//! Reads go straight to the store; lifecycle changes go through the
//! registry so live actors stay consistent with persisted state.

use axum::Json;
use axum::extract::{Path as PathExtract, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::api::{
    CloseSessionResponse, CreateSessionRequest, EventResponse, ListSessionsResponse,
    MessageResponse, SessionDetailResponse, SessionResponse, SessionStatusResponse,
};
use crate::handlers::problem_details;
use crate::server::AppState;
use crate::session::SessionError;
use crate::store::StoreError;

// ============================================================================
// Query Types
// ============================================================================

#[derive(Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_size")]
    size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_size() -> u32 {
    10
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/sessions
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    match state.registry.create(req).await {
        Ok((_handle, record)) => {
            (StatusCode::CREATED, Json(SessionResponse::from(record))).into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to create session");
            problem_details::internal_error("failed to create session").into_response()
        }
    }
}

/// GET /api/v1/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
) -> impl IntoResponse {
    let page = query.page.max(1);
    let size = query.size.clamp(1, 100);

    match state.registry.store().list_sessions(page, size).await {
        Ok(result) => Json(ListSessionsResponse {
            sessions: result
                .sessions
                .into_iter()
                .map(SessionResponse::from)
                .collect(),
            total: result.total,
            page,
            size,
        })
        .into_response(),
        Err(e) => {
            error!(error = %e, "failed to list sessions");
            problem_details::internal_error("failed to list sessions").into_response()
        }
    }
}

/// GET /api/v1/sessions/{session_id}
pub async fn get_session(
    State(state): State<AppState>,
    PathExtract(session_id): PathExtract<String>,
) -> Response {
    match state.registry.store().get_history(&session_id).await {
        Ok(history) => Json(SessionDetailResponse {
            session: SessionResponse::from(history.session),
            messages: history
                .messages
                .into_iter()
                .map(MessageResponse::from)
                .collect(),
            events: history.events.into_iter().map(EventResponse::from).collect(),
        })
        .into_response(),
        Err(e) => store_error_response(e, "failed to get session"),
    }
}

/// GET /api/v1/sessions/{session_id}/status
pub async fn get_session_status(
    State(state): State<AppState>,
    PathExtract(session_id): PathExtract<String>,
) -> Response {
    match state.registry.store().get_session(&session_id).await {
        Ok(session) => Json(SessionStatusResponse {
            session_id: session.session_id,
            status: session.status,
            created_at: session.created_at,
            updated_at: session.updated_at,
            completed_at: session.completed_at,
        })
        .into_response(),
        Err(e) => store_error_response(e, "failed to get session status"),
    }
}

/// DELETE /api/v1/sessions/{session_id}
///
/// Cancels the session if still active. Closing an already-terminal
/// session succeeds without changing anything.
pub async fn close_session(
    State(state): State<AppState>,
    PathExtract(session_id): PathExtract<String>,
) -> Response {
    match state.registry.close(&session_id).await {
        Ok(()) => {
            // A connected client learns about the close by losing its socket.
            state.hub.kick(&session_id);
            Json(CloseSessionResponse {
                message: "Session closed successfully".to_string(),
            })
            .into_response()
        }
        Err(e) => session_error_response(e, "failed to close session"),
    }
}

#[derive(Serialize)]
pub struct ChatInfoResponse {
    pub message: String,
    pub websocket_url: String,
}

/// POST /api/v1/sessions/{session_id}/chat
///
/// Chat happens over WebSocket; this endpoint just points there.
pub async fn chat_info(PathExtract(session_id): PathExtract<String>) -> Json<ChatInfoResponse> {
    Json(ChatInfoResponse {
        message: "Please use WebSocket connection for real-time chat".to_string(),
        websocket_url: format!("/ws/chat/{session_id}"),
    })
}

// ============================================================================
// Error Mapping
// ============================================================================

fn store_error_response(e: StoreError, context: &str) -> Response {
    match e {
        StoreError::NotFound(id) => problem_details::not_found(format!("session not found: {id}")),
        StoreError::InvalidTransition { from, to } => {
            problem_details::conflict(format!("cannot transition session from {from} to {to}"))
        }
        other => {
            error!(error = %other, "{context}");
            problem_details::internal_error(context)
        }
    }
}

fn session_error_response(e: SessionError, context: &str) -> Response {
    match e {
        SessionError::NotFound(id) => {
            problem_details::not_found(format!("session not found: {id}"))
        }
        SessionError::Busy => {
            problem_details::conflict("session is already processing a message")
        }
        SessionError::NotActive { status } => {
            problem_details::conflict(format!("session is {status}, not active"))
        }
        SessionError::Store(e) => store_error_response(e, context),
        SessionError::ActorShutdown => {
            error!("{context}: actor shut down");
            problem_details::internal_error(context)
        }
    }
}
