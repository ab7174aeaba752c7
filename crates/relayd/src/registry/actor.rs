//! Session manager actor - owns all session state and processes commands.
//!
//! The SessionManager is the single owner of both registries. It receives
//! commands from connections and exit notices from transcoders, handles
//! them one at a time, and publishes events via broadcast.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel send failures are logged but don't panic

use bytes::Bytes;
use relay_core::{ConnectionId, SessionId};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::commands::{EndReason, ManagerCommand, RegistryError, RelayEvent, SessionView};
use super::sessions::SessionRegistry;
use super::viewers::ViewerRegistry;
use crate::transcoder::{ExitNotice, TranscoderConfig};

/// The session manager actor.
///
/// # Ownership
///
/// The actor owns:
/// - `sessions`: session → live transcoder
/// - `viewers`: session → viewing connections
///
/// # Thread Safety
///
/// Commands and exit notices are two queues drained by the same task, so
/// every registry mutation happens on that task in arrival order.
pub struct SessionManager {
    /// Command receiver
    receiver: mpsc::Receiver<ManagerCommand>,

    /// Exit notices from transcoder watchers
    exits: mpsc::UnboundedReceiver<ExitNotice>,

    sessions: SessionRegistry,

    viewers: ViewerRegistry,

    /// Event publisher for viewer counts and lifecycle events
    event_publisher: broadcast::Sender<RelayEvent>,
}

impl SessionManager {
    /// Creates a new session manager.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `event_publisher` - Broadcast channel for publishing events
    /// * `config` - How to launch transcoders
    pub fn new(
        receiver: mpsc::Receiver<ManagerCommand>,
        event_publisher: broadcast::Sender<RelayEvent>,
        config: TranscoderConfig,
    ) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Self::with_sessions(
            receiver,
            event_publisher,
            exit_rx,
            SessionRegistry::new(config, exit_tx),
        )
    }

    /// Creates a manager around an existing session registry.
    ///
    /// `exits` must be the receiver paired with the registry's exit sender.
    pub fn with_sessions(
        receiver: mpsc::Receiver<ManagerCommand>,
        event_publisher: broadcast::Sender<RelayEvent>,
        exits: mpsc::UnboundedReceiver<ExitNotice>,
        sessions: SessionRegistry,
    ) -> Self {
        Self {
            receiver,
            exits,
            sessions,
            viewers: ViewerRegistry::new(),
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all handles dropped),
    /// then stops every remaining transcoder.
    pub async fn run(mut self) {
        info!("Session manager starting");

        loop {
            tokio::select! {
                biased;

                Some(notice) = self.exits.recv() => {
                    self.handle_exit(notice);
                }

                cmd = self.receiver.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
            }
        }

        let stopped = self.stop_all();
        info!(stopped, "Session manager stopped");
    }

    /// Dispatches a command to the appropriate handler.
    pub(crate) fn handle_command(&mut self, cmd: ManagerCommand) {
        match cmd {
            ManagerCommand::ForwardChunk { session_id, chunk } => {
                self.handle_forward_chunk(session_id, chunk);
            }
            ManagerCommand::Stop {
                session_id,
                respond_to,
            } => {
                let result = self.handle_stop(&session_id);
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            ManagerCommand::JoinViewer {
                session_id,
                conn_id,
                respond_to,
            } => {
                let result = self.handle_join(session_id, conn_id);
                let _ = respond_to.send(result);
            }
            ManagerCommand::LeaveViewer {
                session_id,
                conn_id,
                respond_to,
            } => {
                let result = self.handle_leave(session_id, &conn_id);
                let _ = respond_to.send(result);
            }
            ManagerCommand::Disconnect {
                conn_id,
                respond_to,
            } => {
                let result = self.handle_disconnect(&conn_id);
                let _ = respond_to.send(result);
            }
            ManagerCommand::GetSession {
                session_id,
                respond_to,
            } => {
                let result = self.sessions.get(&session_id).map(SessionView::from_handle);
                let _ = respond_to.send(result);
            }
            ManagerCommand::ListSessions { respond_to } => {
                let result = self.sessions.iter().map(SessionView::from_handle).collect();
                let _ = respond_to.send(result);
            }
            ManagerCommand::ViewerCount {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.viewers.count(&session_id));
            }
            ManagerCommand::Shutdown { respond_to } => {
                let result = self.stop_all();
                let _ = respond_to.send(result);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Forwards a chunk, starting the session's transcoder if needed.
    ///
    /// Nothing is reported back to the sender: spawn and write failures are
    /// logged and the next chunk simply tries again.
    fn handle_forward_chunk(&mut self, session_id: SessionId, chunk: Bytes) {
        if session_id.is_empty() || chunk.is_empty() {
            warn!(session_id = %session_id, "Missing streamKey or chunk, dropping");
            return;
        }

        let (handle, created) = match self.sessions.get_or_create(&session_id) {
            Ok(found) => found,
            Err(RegistryError::RegistryFull { max }) => {
                warn!(session_id = %session_id, max, "Too many active streams, dropping chunk");
                return;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Failed to start transcoder");
                return;
            }
        };

        let instance = handle.instance();

        // A dead process keeps its entry until its exit notice arrives.
        if let Err(e) = handle.write(chunk) {
            warn!(session_id = %session_id, instance, error = %e, "Chunk not forwarded");
        }

        if created {
            let _ = self.event_publisher.send(RelayEvent::SessionStarted {
                session_id,
                instance,
            });
        }
    }

    /// Stops a session's transcoder; returns whether one was running.
    fn handle_stop(&mut self, session_id: &SessionId) -> bool {
        match self.sessions.remove(session_id) {
            Some(handle) => {
                let instance = handle.instance();
                handle.stop();

                let _ = self.event_publisher.send(RelayEvent::SessionEnded {
                    session_id: session_id.clone(),
                    instance,
                    reason: EndReason::Stopped,
                });
                true
            }
            None => {
                debug!(session_id = %session_id, "Stop requested for session without transcoder");
                false
            }
        }
    }

    fn handle_join(&mut self, session_id: SessionId, conn_id: ConnectionId) -> usize {
        let count = self.viewers.join(&session_id, conn_id);
        debug!(session_id = %session_id, count, "Viewer joined");
        self.publish_count(session_id, count);
        count
    }

    fn handle_leave(&mut self, session_id: SessionId, conn_id: &ConnectionId) -> Option<usize> {
        let count = self.viewers.leave(&session_id, conn_id)?;
        debug!(session_id = %session_id, count, "Viewer left");
        self.publish_count(session_id, count);
        Some(count)
    }

    fn handle_disconnect(&mut self, conn_id: &ConnectionId) -> usize {
        let changed = self.viewers.disconnect_all(conn_id);
        let affected = changed.len();

        for (session_id, count) in changed {
            self.publish_count(session_id, count);
        }

        if affected > 0 {
            debug!(conn_id = %conn_id, affected, "Removed disconnected viewer");
        }
        affected
    }

    /// Removes the session if the exited process is still the registered one.
    fn handle_exit(&mut self, notice: ExitNotice) {
        let ExitNotice {
            session_id,
            instance,
            outcome,
        } = notice;

        match self.sessions.remove_exited(&session_id, instance) {
            Some(_handle) => {
                info!(
                    session_id = %session_id,
                    instance,
                    outcome = %outcome,
                    "Transcoder exited, session removed"
                );
                let _ = self.event_publisher.send(RelayEvent::SessionEnded {
                    session_id,
                    instance,
                    reason: EndReason::Exited(outcome),
                });
            }
            None => {
                debug!(
                    session_id = %session_id,
                    instance,
                    "Exit of a transcoder that was already replaced or stopped"
                );
            }
        }
    }

    /// Stops every transcoder; returns how many were running.
    fn stop_all(&mut self) -> usize {
        let handles = self.sessions.drain();
        let stopped = handles.len();

        for handle in handles {
            let session_id = handle.session_id().clone();
            let instance = handle.instance();
            handle.stop();

            let _ = self.event_publisher.send(RelayEvent::SessionEnded {
                session_id,
                instance,
                reason: EndReason::Shutdown,
            });
        }

        stopped
    }

    fn publish_count(&self, session_id: SessionId, count: usize) {
        // No subscribers is fine
        let _ = self
            .event_publisher
            .send(RelayEvent::ViewerCount { session_id, count });
    }

    /// Returns the number of running transcoders (for testing).
    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
