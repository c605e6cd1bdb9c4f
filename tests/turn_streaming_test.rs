//! End-to-end tests for the WebSocket chat flow.
//!
//! These run a real server on an ephemeral port and talk to it with a
//! WebSocket client, since `tower::ServiceExt::oneshot` cannot carry an
//! upgraded connection.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use opsession::api::CreateSessionRequest;
use opsession::config::ServerConfig;
use opsession::server::{self, AppState};

mod common;

use common::test_app_state;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server(state: AppState) -> SocketAddr {
    let app = server::build_app(state, &ServerConfig::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

async fn connect(addr: SocketAddr, session_id: &str) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}/ws/chat/{session_id}"))
        .await
        .unwrap();
    ws
}

/// Read frames until the next text frame and parse it.
async fn next_frame(ws: &mut WsClient) -> serde_json::Value {
    loop {
        match ws.next().await.expect("socket closed early").unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

async fn send_chat(ws: &mut WsClient, message: &str) {
    let frame = serde_json::json!({"type": "chat", "data": {"message": message}});
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

fn request() -> CreateSessionRequest {
    CreateSessionRequest {
        title: None,
        system_prompt: None,
        model_name: None,
        tool_version: None,
    }
}

#[tokio::test]
async fn chat_turn_streams_events_and_completes() {
    let state = test_app_state().await;
    let registry = state.registry.clone();
    let addr = spawn_server(state).await;

    let (_handle, record) = registry.create(request()).await.unwrap();
    let mut ws = connect(addr, &record.session_id).await;

    let connection = next_frame(&mut ws).await;
    assert_eq!(connection["type"], "connection");
    assert_eq!(connection["data"]["session_id"], record.session_id);

    send_chat(&mut ws, "What's the weather in Dubai?").await;

    let ack = next_frame(&mut ws).await;
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["data"]["user_message"], "What's the weather in Dubai?");

    let mut types = Vec::new();
    loop {
        let frame = next_frame(&mut ws).await;
        let frame_type = frame["type"].as_str().unwrap().to_string();
        types.push(frame_type.clone());
        if frame_type == "complete" {
            assert_eq!(frame["data"]["status"], "completed");
            break;
        }
    }
    assert_eq!(
        types,
        vec!["content", "tool_call", "tool_call", "tool_call", "content", "complete"]
    );

    // Every delivered event is already durable.
    let history = registry
        .store()
        .get_history(&record.session_id)
        .await
        .unwrap();
    // user + 2 assistant + completion marker
    assert_eq!(history.messages.len(), 4);
    assert_eq!(history.events.len(), 3);
    assert_eq!(
        history.messages.last().unwrap().content,
        "Demo response completed"
    );
    assert_eq!(history.session.status.as_str(), "completed");
}

#[tokio::test]
async fn second_chat_on_completed_session_gets_error() {
    let state = test_app_state().await;
    let registry = state.registry.clone();
    let addr = spawn_server(state).await;

    let (_handle, record) = registry.create(request()).await.unwrap();
    let mut ws = connect(addr, &record.session_id).await;
    next_frame(&mut ws).await; // connection

    send_chat(&mut ws, "hello").await;
    loop {
        let frame = next_frame(&mut ws).await;
        if frame["type"] == "complete" {
            break;
        }
    }

    send_chat(&mut ws, "hello again").await;
    next_frame(&mut ws).await; // ack
    let error = next_frame(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert!(
        error["data"]["error"]
            .as_str()
            .unwrap()
            .contains("not active")
    );
}

#[tokio::test]
async fn unknown_session_is_rejected_with_error_frame() {
    let state = test_app_state().await;
    let addr = spawn_server(state).await;

    let mut ws = connect(addr, "session_nonexistent").await;

    let error = next_frame(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert!(
        error["data"]["error"]
            .as_str()
            .unwrap()
            .contains("not found")
    );

    // Server closes after the rejection.
    loop {
        match ws.next().await {
            None | Some(Ok(Message::Close(_))) | Some(Err(_)) => break,
            Some(Ok(_)) => continue,
        }
    }
}

#[tokio::test]
async fn ping_gets_pong() {
    let state = test_app_state().await;
    let registry = state.registry.clone();
    let addr = spawn_server(state).await;

    let (_handle, record) = registry.create(request()).await.unwrap();
    let mut ws = connect(addr, &record.session_id).await;
    next_frame(&mut ws).await; // connection

    ws.send(Message::Text(r#"{"type": "ping"}"#.to_string()))
        .await
        .unwrap();

    let pong = next_frame(&mut ws).await;
    assert_eq!(pong["type"], "pong");
    assert!(pong["data"]["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn invalid_frame_gets_error_and_keeps_connection() {
    let state = test_app_state().await;
    let registry = state.registry.clone();
    let addr = spawn_server(state).await;

    let (_handle, record) = registry.create(request()).await.unwrap();
    let mut ws = connect(addr, &record.session_id).await;
    next_frame(&mut ws).await; // connection

    ws.send(Message::Text("not json".to_string())).await.unwrap();
    let error = next_frame(&mut ws).await;
    assert_eq!(error["type"], "error");

    // Connection still works afterwards.
    ws.send(Message::Text(r#"{"type": "ping"}"#.to_string()))
        .await
        .unwrap();
    let pong = next_frame(&mut ws).await;
    assert_eq!(pong["type"], "pong");
}

#[tokio::test]
async fn new_connection_replaces_the_old_one() {
    let state = test_app_state().await;
    let registry = state.registry.clone();
    let addr = spawn_server(state).await;

    let (_handle, record) = registry.create(request()).await.unwrap();

    let mut first = connect(addr, &record.session_id).await;
    next_frame(&mut first).await; // connection

    let mut second = connect(addr, &record.session_id).await;
    let frame = next_frame(&mut second).await;
    assert_eq!(frame["type"], "connection");

    // The first connection is closed by the server.
    loop {
        match first.next().await {
            None | Some(Ok(Message::Close(_))) | Some(Err(_)) => break,
            Some(Ok(_)) => continue,
        }
    }

    // The replacement still works.
    send_chat(&mut second, "weather in San Francisco").await;
    let ack = next_frame(&mut second).await;
    assert_eq!(ack["type"], "ack");
}
