//! WebSocket chat endpoint.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::{MessageRole, MessageType, SessionStatus};
use crate::server::AppState;
use crate::session::{SessionHandle, TurnUpdate};

use super::{ClientFrame, ServerFrame};

/// Capacity of the per-connection outbound frame queue.
const OUTBOUND_CAPACITY: usize = 64;

/// `GET /ws/chat/{session_id}`: upgrade to a chat socket.
pub async fn ws_chat(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

/// Main handler for an individual WebSocket connection.
///
/// All outbound traffic flows through one mpsc queue drained by a forward
/// task, so turn updates and protocol frames cannot interleave mid-write.
async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    let (mut sink, mut stream) = socket.split();

    // Resolve the session before registering the connection.
    let handle = match state.registry.get_or_load(&session_id).await {
        Ok(handle) => handle,
        Err(e) => {
            debug!(session_id = %session_id, error = %e, "Rejecting socket");
            let frame = ServerFrame::Error {
                error: e.to_string(),
            };
            if let Ok(text) = serde_json::to_string(&frame) {
                let _ = sink.send(Message::Text(text.into())).await;
            }
            let _ = sink.close().await;
            return;
        }
    };

    let (conn_id, mut closed_rx) = state.hub.register(&session_id);
    info!(session_id = %session_id, conn_id = %conn_id, "WebSocket connected");

    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(OUTBOUND_CAPACITY);

    // Forward task: serialize frames and write them to the socket. Exits
    // when the queue closes or the peer goes away.
    let forward = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let _ = out_tx
        .send(ServerFrame::Connection {
            message: "Connected to computer use agent".to_string(),
            session_id: session_id.clone(),
        })
        .await;

    loop {
        tokio::select! {
            _ = closed_rx.changed() => {
                if *closed_rx.borrow() {
                    debug!(session_id = %session_id, conn_id = %conn_id, "Connection displaced");
                    break;
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&state, &handle, &text, &out_tx).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary and protocol-level ping/pong
                    Some(Err(e)) => {
                        debug!(session_id = %session_id, error = %e, "Socket error");
                        break;
                    }
                }
            }
        }
    }

    state.hub.unregister(&session_id, conn_id);
    drop(out_tx);
    let _ = forward.await;
    info!(session_id = %session_id, conn_id = %conn_id, "WebSocket disconnected");
}

/// Dispatch one inbound text frame.
async fn handle_text(
    state: &AppState,
    handle: &SessionHandle,
    text: &str,
    out_tx: &mpsc::Sender<ServerFrame>,
) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Chat { message }) => {
            if message.is_empty() {
                return;
            }
            let _ = out_tx
                .send(ServerFrame::Ack {
                    message: "Message received".to_string(),
                    user_message: message.clone(),
                })
                .await;
            run_chat_turn(state, handle, message, out_tx).await;
        }
        Ok(ClientFrame::Ping) => {
            let _ = out_tx
                .send(ServerFrame::Pong {
                    timestamp: Utc::now().timestamp_millis(),
                })
                .await;
        }
        Err(e) => {
            let _ = out_tx
                .send(ServerFrame::Error {
                    error: format!("invalid message: {e}"),
                })
                .await;
        }
    }
}

/// Run one turn, bridging turn updates onto the outbound frame queue.
///
/// The bridge is awaited before returning so the complete or error frame
/// is queued before any later ack.
async fn run_chat_turn(
    state: &AppState,
    handle: &SessionHandle,
    message: String,
    out_tx: &mpsc::Sender<ServerFrame>,
) {
    let (turn_tx, mut turn_rx) = mpsc::channel::<TurnUpdate>(OUTBOUND_CAPACITY);

    let bridge_tx = out_tx.clone();
    let bridge = tokio::spawn(async move {
        while let Some(update) = turn_rx.recv().await {
            let frame = match update {
                TurnUpdate::Content { content } => ServerFrame::Content {
                    role: MessageRole::Assistant,
                    content,
                    message_type: MessageType::Text,
                },
                TurnUpdate::ToolCall { tool_name, input } => {
                    ServerFrame::ToolCall { tool_name, input }
                }
                TurnUpdate::ToolResult { tool_name, output } => {
                    ServerFrame::ToolResult { tool_name, output }
                }
                TurnUpdate::Completed => ServerFrame::Complete {
                    status: SessionStatus::Completed,
                },
                TurnUpdate::Failed { message } => ServerFrame::Error { error: message },
            };
            if bridge_tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    let result = state.turns.run_turn(handle, message, &turn_tx).await;
    drop(turn_tx);
    let _ = bridge.await;

    if let Err(e) = result {
        let _ = out_tx
            .send(ServerFrame::Error {
                error: e.to_string(),
            })
            .await;
    }
}
