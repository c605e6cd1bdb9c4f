//! Connection tracking with single-connection-per-session semantics.
//!
//! The hub records which connection currently owns a session's socket.
//! Registering over an existing connection signals the old one to close;
//! the new connection wins without the client ever seeing an error.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;
use ulid::Ulid;

struct Slot {
    conn_id: Ulid,
    /// Fires when this connection has been replaced or kicked.
    closed_tx: watch::Sender<bool>,
}

/// Registry of live WebSocket connections, keyed by session ID.
#[derive(Clone, Default)]
pub struct ConnectionHub {
    slots: Arc<DashMap<String, Slot>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a session, displacing any existing one.
    ///
    /// Returns this connection's ID and a signal that fires when it is
    /// displaced in turn.
    pub fn register(&self, session_id: &str) -> (Ulid, watch::Receiver<bool>) {
        let conn_id = Ulid::new();
        let (closed_tx, closed_rx) = watch::channel(false);

        if let Some(old) = self.slots.insert(
            session_id.to_string(),
            Slot {
                conn_id,
                closed_tx,
            },
        ) {
            debug!(session_id = %session_id, "Replacing existing connection");
            let _ = old.closed_tx.send(true);
        }

        (conn_id, closed_rx)
    }

    /// Remove a connection's slot.
    ///
    /// Only removes when `conn_id` still owns the slot, so a replaced
    /// connection's cleanup cannot evict its replacement.
    pub fn unregister(&self, session_id: &str, conn_id: Ulid) {
        self.slots
            .remove_if(session_id, |_, slot| slot.conn_id == conn_id);
    }

    /// Tell the session's connection, if any, to close.
    ///
    /// Returns true if a connection was signalled.
    pub fn kick(&self, session_id: &str) -> bool {
        match self.slots.remove(session_id) {
            Some((_, slot)) => {
                let _ = slot.closed_tx.send(true);
                true
            }
            None => false,
        }
    }

    /// Whether a connection is registered for the session.
    pub fn is_connected(&self, session_id: &str) -> bool {
        self.slots.contains_key(session_id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
