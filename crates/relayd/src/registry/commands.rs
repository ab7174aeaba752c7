//! Session manager commands, errors, and events.
//!
//! This module defines the message types for communicating with the `SessionManager`:
//! - `ManagerCommand`: Commands sent to the actor
//! - `RegistryError` / `ManagerError`: Errors that can occur
//! - `RelayEvent`: Events published by the manager for subscribers
//!
//! All types are designed for async message passing and follow the panic-free policy.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use relay_core::{ConnectionId, SessionId};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::transcoder::{ExitOutcome, ProcessHandle, TranscoderError};

// ============================================================================
// Manager Commands
// ============================================================================

/// Commands sent to the session manager actor.
///
/// Request-style commands carry a oneshot channel for the response.
/// `ForwardChunk` is fire-and-forget: the sender never waits on the
/// transcoder.
#[derive(Debug)]
pub enum ManagerCommand {
    /// Forward a media chunk, starting a transcoder if the session has none.
    ForwardChunk {
        session_id: SessionId,
        chunk: Bytes,
    },

    /// Stop the session's transcoder (no-op if none is running).
    ///
    /// Responds with whether a transcoder was running.
    Stop {
        session_id: SessionId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Add a connection to a session's viewer set.
    ///
    /// Responds with the new viewer count.
    JoinViewer {
        session_id: SessionId,
        conn_id: ConnectionId,
        respond_to: oneshot::Sender<usize>,
    },

    /// Remove a connection from a session's viewer set.
    ///
    /// Responds with the new count, or `None` if the connection was not a viewer.
    LeaveViewer {
        session_id: SessionId,
        conn_id: ConnectionId,
        respond_to: oneshot::Sender<Option<usize>>,
    },

    /// Remove a closed connection from every viewer set.
    ///
    /// Responds with the number of sessions whose count changed.
    Disconnect {
        conn_id: ConnectionId,
        respond_to: oneshot::Sender<usize>,
    },

    /// Snapshot of one session's transcoder.
    GetSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<SessionView>>,
    },

    /// Snapshots of every running transcoder.
    ListSessions {
        respond_to: oneshot::Sender<Vec<SessionView>>,
    },

    /// Current viewer count of a session.
    ViewerCount {
        session_id: SessionId,
        respond_to: oneshot::Sender<usize>,
    },

    /// Stop every transcoder.
    ///
    /// Responds with the number of transcoders stopped.
    Shutdown { respond_to: oneshot::Sender<usize> },
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised inside the session registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry has reached its maximum number of transcoders.
    #[error("registry is full (max: {max} sessions)")]
    RegistryFull { max: usize },

    /// The transcoder for a new session could not be started.
    #[error(transparent)]
    Transcoder(#[from] TranscoderError),
}

/// Errors returned by [`super::ManagerHandle`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    /// The session identifier was empty.
    #[error("session identifier must not be empty")]
    InvalidSessionId,

    /// The manager task is gone or dropped the response channel.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Relay Events
// ============================================================================

/// Events published by the session manager.
///
/// Connection handlers forward `ViewerCount` to every peer; the
/// lifecycle events are for in-process subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A session's viewer set changed (or a viewer joined).
    ViewerCount { session_id: SessionId, count: usize },

    /// A transcoder was started for a session.
    SessionStarted { session_id: SessionId, instance: u64 },

    /// A session's transcoder was removed from the registry.
    SessionEnded {
        session_id: SessionId,
        instance: u64,
        reason: EndReason,
    },
}

/// Why a session's transcoder was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// A peer sent a stop request.
    Stopped,

    /// The process exited on its own.
    Exited(ExitOutcome),

    /// The daemon is shutting down.
    Shutdown,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped by request"),
            Self::Exited(outcome) => write!(f, "process exited ({outcome})"),
            Self::Shutdown => write!(f, "daemon shutdown"),
        }
    }
}

// ============================================================================
// Session View
// ============================================================================

/// Read-only snapshot of a running transcoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub instance: u64,
    pub pid: Option<u32>,
    pub destination: String,
    pub started_at: DateTime<Utc>,
    pub chunks_forwarded: u64,
    pub bytes_forwarded: u64,
}

impl SessionView {
    pub fn from_handle(handle: &ProcessHandle) -> Self {
        Self {
            session_id: handle.session_id().clone(),
            instance: handle.instance(),
            pid: handle.pid(),
            destination: handle.destination().to_string(),
            started_at: handle.started_at(),
            chunks_forwarded: handle.chunks_forwarded(),
            bytes_forwarded: handle.bytes_forwarded(),
        }
    }
}
