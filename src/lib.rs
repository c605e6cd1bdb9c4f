//! Session-managed computer use agent service.
//!
//! Sessions are created and inspected over REST; chat happens over a
//! WebSocket that streams the agent's response events. Every event is
//! persisted to SQLite before the client sees it.

pub mod api;
pub mod build_info;
pub mod config;
pub mod generate;
pub mod handlers;
pub mod server;
pub mod session;
pub mod store;
pub mod ws;
