//! Client interface for interacting with the SessionManager.
//!
//! The `ManagerHandle` provides a cheap-to-clone interface for sending commands
//! to the session manager and subscribing to relay events.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `ManagerError::ChannelClosed`

use bytes::Bytes;
use relay_core::{ConnectionId, SessionId};
use tokio::sync::{broadcast, mpsc, oneshot};

use super::commands::{ManagerCommand, ManagerError, RelayEvent, SessionView};

// ============================================================================
// Manager Handle
// ============================================================================

/// Handle for interacting with the session manager.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// Every connection handler owns one.
///
/// # Usage
///
/// ```ignore
/// let handle = manager_handle.clone();
///
/// // Forward a chunk (starts a transcoder on first use)
/// handle.forward_chunk(session_id, chunk).await?;
///
/// // Track a viewer
/// let count = handle.join_viewer(session_id, conn_id).await?;
///
/// // Subscribe to viewer counts
/// let mut rx = handle.subscribe();
/// while let Ok(event) = rx.recv().await {
///     // Handle event
/// }
/// ```
#[derive(Clone)]
pub struct ManagerHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<ManagerCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<RelayEvent>,
}

impl ManagerHandle {
    /// Create a new manager handle.
    pub fn new(
        sender: mpsc::Sender<ManagerCommand>,
        event_sender: broadcast::Sender<RelayEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Forward a chunk to the session's transcoder.
    ///
    /// Fire-and-forget: returns once the command is queued. Spawn and write
    /// failures are logged by the manager, not returned.
    ///
    /// # Errors
    ///
    /// - `ManagerError::InvalidSessionId` if `session_id` is empty
    /// - `ManagerError::ChannelClosed` if the manager has shut down
    pub async fn forward_chunk(
        &self,
        session_id: SessionId,
        chunk: Bytes,
    ) -> Result<(), ManagerError> {
        ensure_valid(&session_id)?;

        self.sender
            .send(ManagerCommand::ForwardChunk { session_id, chunk })
            .await
            .map_err(|_| ManagerError::ChannelClosed)
    }

    /// Stop the session's transcoder.
    ///
    /// Returns whether a transcoder was running. Does not wait for the
    /// process to exit.
    ///
    /// # Errors
    ///
    /// - `ManagerError::InvalidSessionId` if `session_id` is empty
    /// - `ManagerError::ChannelClosed` if the manager has shut down
    pub async fn stop(&self, session_id: SessionId) -> Result<bool, ManagerError> {
        ensure_valid(&session_id)?;
        self.request(|respond_to| ManagerCommand::Stop {
            session_id,
            respond_to,
        })
        .await
    }

    /// Mark `conn_id` as watching `session_id`; returns the new count.
    ///
    /// # Errors
    ///
    /// - `ManagerError::InvalidSessionId` if `session_id` is empty
    /// - `ManagerError::ChannelClosed` if the manager has shut down
    pub async fn join_viewer(
        &self,
        session_id: SessionId,
        conn_id: ConnectionId,
    ) -> Result<usize, ManagerError> {
        ensure_valid(&session_id)?;
        self.request(|respond_to| ManagerCommand::JoinViewer {
            session_id,
            conn_id,
            respond_to,
        })
        .await
    }

    /// Unmark `conn_id` as watching `session_id`.
    ///
    /// Returns the new count, or `None` if the connection was not watching.
    ///
    /// # Errors
    ///
    /// - `ManagerError::InvalidSessionId` if `session_id` is empty
    /// - `ManagerError::ChannelClosed` if the manager has shut down
    pub async fn leave_viewer(
        &self,
        session_id: SessionId,
        conn_id: ConnectionId,
    ) -> Result<Option<usize>, ManagerError> {
        ensure_valid(&session_id)?;
        self.request(|respond_to| ManagerCommand::LeaveViewer {
            session_id,
            conn_id,
            respond_to,
        })
        .await
    }

    /// Remove a closed connection from every viewer set.
    ///
    /// Returns the number of sessions whose count changed.
    ///
    /// # Errors
    ///
    /// - `ManagerError::ChannelClosed` if the manager has shut down
    pub async fn disconnect(&self, conn_id: ConnectionId) -> Result<usize, ManagerError> {
        self.request(|respond_to| ManagerCommand::Disconnect {
            conn_id,
            respond_to,
        })
        .await
    }

    /// Get a snapshot of one session's transcoder.
    ///
    /// Returns `None` if no transcoder is running or if communication
    /// with the actor fails.
    pub async fn get_session(&self, session_id: SessionId) -> Option<SessionView> {
        self.request(|respond_to| ManagerCommand::GetSession {
            session_id,
            respond_to,
        })
        .await
        .ok()?
    }

    /// Get snapshots of every running transcoder.
    ///
    /// Returns an empty vector if communication with the actor fails.
    pub async fn list_sessions(&self) -> Vec<SessionView> {
        self.request(|respond_to| ManagerCommand::ListSessions { respond_to })
            .await
            .unwrap_or_default()
    }

    /// Current viewer count of a session (0 if unknown or on failure).
    pub async fn viewer_count(&self, session_id: SessionId) -> usize {
        self.request(|respond_to| ManagerCommand::ViewerCount {
            session_id,
            respond_to,
        })
        .await
        .unwrap_or(0)
    }

    /// Stop every running transcoder; returns how many were stopped.
    ///
    /// # Errors
    ///
    /// - `ManagerError::ChannelClosed` if the manager has shut down
    pub async fn shutdown(&self) -> Result<usize, ManagerError> {
        self.request(|respond_to| ManagerCommand::Shutdown { respond_to })
            .await
    }

    /// Subscribe to relay events.
    ///
    /// This is a synchronous operation - it doesn't communicate with the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> Result<T, ManagerError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(command(tx))
            .await
            .map_err(|_| ManagerError::ChannelClosed)?;

        rx.await.map_err(|_| ManagerError::ChannelClosed)
    }
}

fn ensure_valid(session_id: &SessionId) -> Result<(), ManagerError> {
    if session_id.is_empty() {
        return Err(ManagerError::InvalidSessionId);
    }
    Ok(())
}
