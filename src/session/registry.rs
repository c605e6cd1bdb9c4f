//! Session registry for managing actor lifecycles.
//!
//! The registry is responsible for:
//! - Creating new session actors
//! - Looking up sessions, reloading them from the store when needed
//! - Closing sessions
//! - Graceful shutdown of all actors

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::api::{CreateSessionRequest, SESSION_ID_PREFIX};
use crate::config::AgentConfig;
use crate::generate::BufferedMessage;
use crate::store::{NewSession, SessionRecord, SessionStore, StoreError};

use super::actor::SessionActor;
use super::actor_types::{ActorConfig, SessionError};
use super::handle::SessionHandle;

// ============================================================================
// Session Registry
// ============================================================================

/// Registry for session actors.
///
/// Manages the lifecycle of session actors: creation, lookup, reload, and
/// shutdown. Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct SessionRegistry {
    /// Session handles by ID.
    handles: Arc<DashMap<String, SessionHandle>>,
    /// Actor task handles for graceful shutdown.
    task_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    /// Session store for persistence.
    store: Arc<dyn SessionStore>,
    /// Defaults applied when a create request leaves fields unset.
    defaults: Arc<AgentConfig>,
    /// Shutdown signal sender.
    shutdown_tx: Arc<watch::Sender<bool>>,
    /// Shutdown signal receiver (cloned for each actor).
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionRegistry {
    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Create a new session registry.
    pub fn new(store: Arc<dyn SessionStore>, defaults: AgentConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            handles: Arc::new(DashMap::new()),
            task_handles: Arc::new(Mutex::new(Vec::new())),
            store,
            defaults: Arc::new(defaults),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Gracefully shutdown all session actors.
    ///
    /// Sends the shutdown signal and waits for all actors to complete.
    pub async fn shutdown(&self) {
        info!("Shutting down session registry");

        if self.shutdown_tx.send(true).is_err() {
            warn!("Failed to send shutdown signal");
            return;
        }

        let task_handles = {
            let mut handles = self.task_handles.lock().await;
            std::mem::take(&mut *handles)
        };

        for task_handle in task_handles {
            if let Err(e) = task_handle.await {
                warn!(error = ?e, "Actor task panicked during shutdown");
            }
        }

        info!("Session registry shutdown complete");
    }

    // ------------------------------------------------------------------------
    // Core API
    // ------------------------------------------------------------------------

    /// Create a new session.
    ///
    /// Persists the session row first, then spawns its actor and makes it
    /// visible in the registry.
    pub async fn create(
        &self,
        req: CreateSessionRequest,
    ) -> Result<(SessionHandle, SessionRecord), SessionError> {
        let id = format!("{}{}", SESSION_ID_PREFIX, Ulid::new());

        let record = self
            .store
            .create_session(NewSession {
                session_id: id.clone(),
                title: req.title.unwrap_or_else(|| self.defaults.title.clone()),
                system_prompt: req
                    .system_prompt
                    .unwrap_or_else(|| self.defaults.system_prompt.clone()),
                model_name: req
                    .model_name
                    .unwrap_or_else(|| self.defaults.model_name.clone()),
                tool_version: req
                    .tool_version
                    .unwrap_or_else(|| self.defaults.tool_version.clone()),
            })
            .await?;

        let handle = self.spawn_actor(record.clone(), Vec::new()).await;
        self.handles.insert(id.clone(), handle.clone());

        info!(session_id = %id, "Session created");
        Ok((handle, record))
    }

    /// Get a live handle for a session, reloading it from the store if no
    /// actor is currently running.
    ///
    /// Fails with `NotFound` only if the session never existed.
    pub async fn get_or_load(&self, id: &str) -> Result<SessionHandle, SessionError> {
        if let Some(handle) = self.handles.get(id) {
            return Ok(handle.clone());
        }

        let history = self.store.get_history(id).await.map_err(|e| match e {
            StoreError::NotFound(id) => SessionError::NotFound(id),
            other => SessionError::Store(other),
        })?;

        let buffered = history
            .messages
            .iter()
            .map(|m| BufferedMessage {
                role: m.role,
                content: m.content.clone(),
            })
            .collect();

        // Another caller may have loaded the same session while we were
        // reading the store; keep whichever actor won. The losing actor
        // exits once its last handle is dropped here.
        let fresh = self.spawn_actor(history.session, buffered).await;
        match self.handles.entry(id.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(fresh.clone());
                debug!(session_id = %id, "Session reloaded from store");
                Ok(fresh)
            }
        }
    }

    /// Close a session: cancel it if still active and drop its actor.
    ///
    /// Idempotent for sessions that exist; fails with `NotFound` only if
    /// the session never existed.
    pub async fn close(&self, id: &str) -> Result<(), SessionError> {
        let handle = self.get_or_load(id).await?;
        handle.close().await?;
        self.handles.remove(id);

        info!(session_id = %id, "Session closed");
        Ok(())
    }

    /// Get a session handle by ID without touching the store.
    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.handles.get(id).map(|r| r.clone())
    }

    /// Remove a session handle from the registry.
    ///
    /// When all clones of the handle are dropped, the actor shuts down
    /// naturally. Returns true if a session was removed.
    pub fn remove(&self, id: &str) -> bool {
        self.handles.remove(id).is_some()
    }

    /// Get a reference to the session store.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Number of sessions with a live actor.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Check if no actors are running.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn spawn_actor(
        &self,
        record: SessionRecord,
        history: Vec<BufferedMessage>,
    ) -> SessionHandle {
        let id = record.session_id.clone();
        let config = ActorConfig {
            record,
            history,
            store: self.store.clone(),
        };

        let (tx, task_handle) = SessionActor::spawn(config, self.shutdown_rx.clone());

        let mut guard = self.task_handles.lock().await;
        guard.retain(|h| !h.is_finished());
        guard.push(task_handle);

        SessionHandle::new(tx, id)
    }
}
