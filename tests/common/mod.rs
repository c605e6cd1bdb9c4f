//! Common test utilities.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use opsession::config::{AgentConfig, ServerConfig};
use opsession::generate::ScriptedGenerator;
use opsession::server::{self, AppState};
use opsession::session::{SessionRegistry, TurnRunner};
use opsession::store::SqliteSessionStore;
use opsession::ws::ConnectionHub;

/// Create a test `AppState` backed by an in-memory database and the
/// scripted generator with no inter-event delay.
pub async fn test_app_state() -> AppState {
    let store = Arc::new(SqliteSessionStore::new_in_memory().await.unwrap());

    AppState {
        registry: SessionRegistry::new(store, AgentConfig::default()),
        hub: ConnectionHub::new(),
        turns: TurnRunner::new(Arc::new(ScriptedGenerator::new(Duration::ZERO))),
    }
}

/// Create a test app with empty state.
pub async fn test_app() -> Router {
    let state = test_app_state().await;
    server::build_app(state, &ServerConfig::default())
}
